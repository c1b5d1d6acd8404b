//! Cartkeeper Engine - cart and stock reservation for a storefront session.
//!
//! The engine keeps the shopper's cart in memory, reserves units on the
//! catalog's remote stock counter as the cart grows, gives them back as it
//! shrinks, and mirrors the cart to a local cache and (for signed-in users)
//! to a remote cart document.
//!
//! # Architecture
//!
//! - [`CartEngine`] - single entry point for cart mutations and reads
//! - [`StockLedger`] - session-local remaining stock per product
//! - [`OperationGuard`] - rejects overlapping mutations on one product
//! - [`Persistence`] - local/remote cart writes and session loads
//! - [`CatalogCache`] - catalog reads with a `moka` fallback cache
//! - [`store`] - collaborator traits plus in-memory and JSON-file adapters
//!
//! Outcomes are published on a typed [`CartEvent`] channel rather than
//! rendered; see [`CartEngine::subscribe`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cartkeeper_engine::store::memory::{
//!     InMemoryCartStore, InMemoryCatalog, InMemoryLocalCache,
//! };
//! use cartkeeper_engine::{CartEngine, Collaborators, EngineConfig, IdentityService};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = CartEngine::new(
//!     EngineConfig::from_env()?,
//!     Collaborators {
//!         catalog: Arc::new(InMemoryCatalog::default()),
//!         carts: Arc::new(InMemoryCartStore::new()),
//!         local: Arc::new(InMemoryLocalCache::new()),
//!         identity: Arc::new(IdentityService::new()),
//!         orders: None,
//!     },
//! );
//! engine.init().await;
//! let products = engine.sync_catalog().await?;
//! if let Some(product) = products.first() {
//!     engine.add_item(product).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod catalog;
mod checkout;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
pub mod identity;
pub mod ledger;
pub mod persistence;
pub mod store;

pub use catalog::{CatalogCache, CatalogRead};
pub use config::{ConfigError, EngineConfig};
pub use engine::{CartEngine, Collaborators};
pub use error::{CartError, Result};
pub use events::{
    CartEvent, CartOperation, EventBus, FailureReason, LoadTarget, PersistenceTarget,
};
pub use guard::{GuardPermit, OperationGuard};
pub use identity::IdentityService;
pub use ledger::StockLedger;
pub use persistence::{CartSource, LoadedCart, Persistence};
pub use store::{CartStore, CatalogStore, IdentityProvider, LocalCache, OrderStore, StoreError};
