//! CLI command implementations.
//!
//! Every cart command runs one short engine session against the JSON-file
//! stores in the data directory: open, init, act, tear down.

pub mod cart;
pub mod catalog;
pub mod orders;

use std::path::Path;
use std::sync::Arc;

use cartkeeper_core::UserId;
use cartkeeper_engine::store::file::{FileCartStore, FileCatalog, FileLocalCache, FileOrderStore};
use cartkeeper_engine::{
    CartEngine, CartEvent, Collaborators, ConfigError, EngineConfig, IdentityService,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Errors that can occur while running a CLI command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Engine configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The command needs `--user`.
    #[error("This command requires --user")]
    UserRequired,

    /// A product id is not in the catalog.
    #[error("Unknown product: {0}")]
    UnknownProduct(String),
}

/// An open cart session.
pub struct Session {
    pub engine: CartEngine,
    events: broadcast::Receiver<CartEvent>,
}

impl Session {
    /// Build an engine over the data directory and load the cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine configuration is invalid.
    pub async fn open(dir: &Path, user: Option<UserId>) -> Result<Self, CommandError> {
        let config = EngineConfig::from_env()?;
        let identity = match user {
            Some(user) => IdentityService::signed_in(user),
            None => IdentityService::new(),
        };

        let engine = CartEngine::new(
            config.clone(),
            Collaborators {
                catalog: Arc::new(FileCatalog::new(dir, config.currency)),
                carts: Arc::new(FileCartStore::new(dir)),
                local: Arc::new(FileLocalCache::new(dir)),
                identity: Arc::new(identity),
                orders: Some(Arc::new(FileOrderStore::new(dir))),
            },
        );
        let events = engine.subscribe();
        let source = engine.init().await;
        debug!(source = ?source, data_dir = %dir.display(), "Session opened");

        Ok(Self { engine, events })
    }

    /// Log warnings published since the last drain.
    pub fn drain_warnings(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                CartEvent::RestockWarning {
                    product_id,
                    quantity,
                    message,
                } => warn!(%product_id, quantity, %message, "Stock was not restored"),
                CartEvent::PersistenceWarning { target, message } => {
                    warn!(?target, %message, "Cart was not saved");
                }
                CartEvent::LoadFailed {
                    target,
                    message,
                    fell_back,
                } => warn!(?target, %message, fell_back, "Load failed"),
                CartEvent::OperationSucceeded { .. } | CartEvent::OperationFailed { .. } => {}
            }
        }
    }

    /// Write the final snapshot and end the session.
    pub fn close(mut self) {
        self.drain_warnings();
        self.engine.teardown();
    }
}
