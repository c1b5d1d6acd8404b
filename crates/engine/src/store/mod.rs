//! Collaborator interfaces consumed by the cart engine.
//!
//! # Collaborators
//!
//! - [`CatalogStore`] - product documents and the atomic per-product stock counter
//! - [`CartStore`] - one cart document per authenticated user
//! - [`LocalCache`] - local key/value entry holding the last cart snapshot
//! - [`IdentityProvider`] - the current signed-in user, if any
//! - [`OrderStore`] - orders and notifications written at checkout
//!
//! The remote store is assumed atomic per document. Two adapters ship with
//! the crate: [`memory`] for tests and embedding, and [`file`] which keeps
//! every document as a JSON file for local development.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use cartkeeper_core::{
    CartDocument, CartLineItem, CartSnapshot, Notification, Order, Product, ProductId, UserId,
};
use thiserror::Error;

/// Errors that can occur when talking to a collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stock counter cannot cover the requested reservation.
    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The acting identity may not perform this call.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Local file access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Remote product catalog with an atomic stock counter per product.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Read every product as one consistent snapshot.
    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Read a single product.
    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>, StoreError>;

    /// Decrease stock by `quantity`, failing if fewer units remain.
    async fn reserve_stock(&self, id: &ProductId, quantity: u32) -> Result<(), StoreError>;

    /// Increase stock by `quantity`.
    async fn restore_stock(&self, id: &ProductId, quantity: u32) -> Result<(), StoreError>;
}

/// Remote cart documents, one per user.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn load_cart(&self, user: &UserId) -> Result<Option<CartDocument>, StoreError>;

    /// Overwrite the user's cart with `items`.
    async fn save_cart(&self, user: &UserId, items: &[CartLineItem]) -> Result<(), StoreError>;

    async fn clear_cart(&self, user: &UserId) -> Result<(), StoreError>;
}

/// Local persistent key/value entry for the cart snapshot.
///
/// Writes are whole-snapshot overwrites, so interleaved writes settle on the
/// last one.
pub trait LocalCache: Send + Sync {
    fn read_snapshot(&self) -> Result<Option<CartSnapshot>, StoreError>;

    fn write_snapshot(&self, snapshot: &CartSnapshot) -> Result<(), StoreError>;

    fn delete_snapshot(&self) -> Result<(), StoreError>;
}

/// Source of the current user identity. `None` means a guest session.
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
}

/// Remote order and notification documents.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError>;
}
