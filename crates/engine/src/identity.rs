//! Signed-in identity shared between the session and the cart engine.
//!
//! The engine only needs a snapshot of the current user id per operation
//! ([`IdentityProvider`]); callers that react to sign-in changes subscribe to
//! the watch channel instead of polling.

use cartkeeper_core::UserId;
use tokio::sync::watch;
use tracing::info;

use crate::store::IdentityProvider;

/// In-process identity holder.
#[derive(Debug)]
pub struct IdentityService {
    sender: watch::Sender<Option<UserId>>,
}

impl Default for IdentityService {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityService {
    /// Start as a guest session.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Start already signed in as `user`.
    #[must_use]
    pub fn signed_in(user: UserId) -> Self {
        let (sender, _) = watch::channel(Some(user));
        Self { sender }
    }

    /// Switch to `user`. Returns false if `user` was already current.
    pub fn sign_in(&self, user: UserId) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if current.as_ref() == Some(&user) {
                return false;
            }
            *current = Some(user.clone());
            true
        });
        if changed {
            info!(user_id = %user, "Signed in");
        }
        changed
    }

    /// Switch to a guest session. Returns false if already a guest.
    pub fn sign_out(&self) -> bool {
        let changed = self.sender.send_if_modified(|current| current.take().is_some());
        if changed {
            info!("Signed out");
        }
        changed
    }

    /// Watch identity changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.sender.subscribe()
    }
}

impl IdentityProvider for IdentityService {
    fn current_user_id(&self) -> Option<UserId> {
        self.sender.borrow().clone()
    }
}
