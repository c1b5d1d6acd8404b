//! Cart persistence orchestration.
//!
//! The local cache always holds the latest snapshot. Authenticated carts are
//! also written to the remote cart store. Write failures never fail the
//! mutation that triggered them; they are logged and published as
//! [`CartEvent::PersistenceWarning`].

use std::sync::Arc;

use cartkeeper_core::{CartDocument, CartLineItem, CartSnapshot, UserId, normalize_items};
use tracing::{debug, info, instrument, warn};

use crate::events::{CartEvent, EventBus, LoadTarget, PersistenceTarget};
use crate::store::{CartStore, LocalCache};

/// Where a loaded cart came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartSource {
    /// The authenticated user's remote cart document.
    Remote,
    /// The local snapshot (guest session, or remote read failed).
    LocalCache,
    /// A guest cart merged into the user's cart at sign-in.
    GuestAdopted,
    /// Nothing stored anywhere.
    Empty,
}

/// Cart items read at session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedCart {
    pub items: Vec<CartLineItem>,
    pub source: CartSource,
}

impl LoadedCart {
    fn new(items: Vec<CartLineItem>, source: CartSource) -> Self {
        if items.is_empty() {
            return Self::empty();
        }
        Self { items, source }
    }

    const fn empty() -> Self {
        Self {
            items: Vec::new(),
            source: CartSource::Empty,
        }
    }
}

/// Writes and reads the cart across the local cache and remote cart store.
#[derive(Clone)]
pub struct Persistence {
    local: Arc<dyn LocalCache>,
    carts: Arc<dyn CartStore>,
    events: EventBus,
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence").finish_non_exhaustive()
    }
}

impl Persistence {
    #[must_use]
    pub fn new(local: Arc<dyn LocalCache>, carts: Arc<dyn CartStore>, events: EventBus) -> Self {
        Self {
            local,
            carts,
            events,
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write `items` locally and, for an authenticated user, remotely.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn persist(&self, user: Option<&UserId>, items: &[CartLineItem]) {
        self.write_local(user, items);

        if let Some(user) = user
            && let Err(e) = self.carts.save_cart(user, items).await
        {
            warn!(user_id = %user, error = %e, "Failed to save remote cart");
            self.events.emit(CartEvent::PersistenceWarning {
                target: PersistenceTarget::RemoteCart,
                message: e.to_string(),
            });
        }
    }

    /// Delete the local snapshot and, for an authenticated user, the remote cart.
    #[instrument(skip(self))]
    pub async fn clear(&self, user: Option<&UserId>) {
        if let Err(e) = self.local.delete_snapshot() {
            warn!(error = %e, "Failed to delete local cart snapshot");
            self.events.emit(CartEvent::PersistenceWarning {
                target: PersistenceTarget::LocalCache,
                message: e.to_string(),
            });
        }

        if let Some(user) = user
            && let Err(e) = self.carts.clear_cart(user).await
        {
            warn!(user_id = %user, error = %e, "Failed to clear remote cart");
            self.events.emit(CartEvent::PersistenceWarning {
                target: PersistenceTarget::RemoteCart,
                message: e.to_string(),
            });
        }
    }

    /// Overwrite the local snapshot.
    pub fn write_local(&self, user: Option<&UserId>, items: &[CartLineItem]) {
        let snapshot = CartSnapshot::new(user.cloned(), items.to_vec());
        if let Err(e) = self.local.write_snapshot(&snapshot) {
            warn!(error = %e, "Failed to write local cart snapshot");
            self.events.emit(CartEvent::PersistenceWarning {
                target: PersistenceTarget::LocalCache,
                message: e.to_string(),
            });
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Load the cart for a session.
    ///
    /// Guests read the local snapshot. Authenticated users read their remote
    /// cart; a guest snapshot left in the local cache is merged into it and
    /// saved back. When the remote read fails the local snapshot is used if it
    /// belongs to this user or to a guest.
    #[instrument(skip(self))]
    pub async fn load(&self, user: Option<&UserId>) -> LoadedCart {
        let snapshot = self.read_local();

        let Some(user) = user else {
            return match snapshot {
                Some(snapshot) if snapshot.is_guest() => {
                    LoadedCart::new(snapshot.into_items(), CartSource::LocalCache)
                }
                _ => LoadedCart::empty(),
            };
        };

        let guest_items = snapshot
            .as_ref()
            .filter(|s| s.is_guest())
            .map(|s| normalize_items(s.items.clone()))
            .unwrap_or_default();

        match self.carts.load_cart(user).await {
            Ok(document) => {
                let remote = document.map(CartDocument::into_items).unwrap_or_default();
                self.merge_guest_cart(user, remote, guest_items).await
            }
            Err(e) => {
                let fallback = snapshot
                    .filter(|s| s.is_guest() || s.user_id.as_ref() == Some(user))
                    .map(CartSnapshot::into_items)
                    .unwrap_or_default();
                warn!(
                    user_id = %user,
                    error = %e,
                    fallback_items = fallback.len(),
                    "Failed to load remote cart, using local snapshot"
                );
                self.events.emit(CartEvent::LoadFailed {
                    target: LoadTarget::Cart,
                    message: e.to_string(),
                    fell_back: !fallback.is_empty(),
                });
                LoadedCart::new(fallback, CartSource::LocalCache)
            }
        }
    }

    /// Load the user's remote cart and merge `guest_items` into it.
    ///
    /// Used at sign-in with the in-memory guest cart. Falls back to keeping
    /// the guest items when the remote read fails; the guest snapshot is left
    /// in place so the next successful load merges it.
    #[instrument(skip(self, guest_items), fields(guest_items = guest_items.len()))]
    pub async fn adopt(&self, user: &UserId, guest_items: Vec<CartLineItem>) -> LoadedCart {
        match self.carts.load_cart(user).await {
            Ok(document) => {
                let remote = document.map(CartDocument::into_items).unwrap_or_default();
                self.merge_guest_cart(user, remote, guest_items).await
            }
            Err(e) => {
                warn!(user_id = %user, error = %e, "Failed to load remote cart at sign-in");
                self.events.emit(CartEvent::LoadFailed {
                    target: LoadTarget::Cart,
                    message: e.to_string(),
                    fell_back: !guest_items.is_empty(),
                });
                LoadedCart::new(guest_items, CartSource::LocalCache)
            }
        }
    }

    async fn merge_guest_cart(
        &self,
        user: &UserId,
        remote: Vec<CartLineItem>,
        guest_items: Vec<CartLineItem>,
    ) -> LoadedCart {
        if guest_items.is_empty() {
            debug!(user_id = %user, items = remote.len(), "Loaded remote cart");
            self.write_local(Some(user), &remote);
            return LoadedCart::new(remote, CartSource::Remote);
        }

        let mut merged = remote;
        merged.extend(guest_items);
        let merged = normalize_items(merged);
        info!(user_id = %user, items = merged.len(), "Adopting guest cart");
        self.persist(Some(user), &merged).await;
        LoadedCart::new(merged, CartSource::GuestAdopted)
    }

    fn read_local(&self) -> Option<CartSnapshot> {
        match self.local.read_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Failed to read local cart snapshot");
                self.events.emit(CartEvent::LoadFailed {
                    target: LoadTarget::Cart,
                    message: e.to_string(),
                    fell_back: false,
                });
                None
            }
        }
    }
}
