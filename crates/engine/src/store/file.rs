//! JSON file collaborators for local development.
//!
//! # Layout
//!
//! ```text
//! <data dir>/
//!   catalog.json          products, as stored product documents
//!   carts/<user>.json     one cart document per user
//!   orders/<id>.json      orders placed at checkout
//!   notifications/<id>.json
//!   local_cart.json       local cart snapshot
//! ```
//!
//! Every write goes to a temporary file that is renamed over the target, so
//! readers never see a half-written document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cartkeeper_core::{
    CartDocument, CartLineItem, CartSnapshot, CurrencyCode, Notification, Order, Product,
    ProductDocument, ProductId, UserId,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CartStore, CatalogStore, LocalCache, OrderStore, StoreError};

/// Write `value` as pretty JSON via a temporary file and rename.
async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read JSON from `path`, returning `None` if the file does not exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// File name component for a document id.
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// =============================================================================
// Catalog
// =============================================================================

/// Catalog stored as a single JSON array of product documents.
///
/// A process-wide lock makes each stock update a read-modify-write on the
/// whole file.
pub struct FileCatalog {
    path: PathBuf,
    currency_code: CurrencyCode,
    lock: Mutex<()>,
}

impl FileCatalog {
    /// Open the catalog at `<dir>/catalog.json`.
    #[must_use]
    pub fn new(dir: &Path, currency_code: CurrencyCode) -> Self {
        Self {
            path: dir.join("catalog.json"),
            currency_code,
            lock: Mutex::new(()),
        }
    }

    /// Replace the catalog with `products`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn import(&self, products: &[Product]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let documents: Vec<ProductDocument> = products.iter().map(ProductDocument::from).collect();
        write_json(&self.path, &documents).await
    }

    async fn documents(&self) -> Result<Vec<ProductDocument>, StoreError> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    fn to_products(&self, documents: Vec<ProductDocument>) -> Vec<Product> {
        documents
            .into_iter()
            .filter_map(|doc| match doc.into_product(self.currency_code) {
                Ok(product) => Some(product),
                Err(e) => {
                    warn!(error = %e, "Skipping invalid product document");
                    None
                }
            })
            .collect()
    }

    /// Apply `update` to the stock of one product and write the catalog back.
    async fn update_stock(
        &self,
        id: &ProductId,
        update: impl FnOnce(i64) -> Result<i64, StoreError> + Send,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut documents = self.documents().await?;
        let document = documents
            .iter_mut()
            .find(|doc| doc.id.as_deref() == Some(id.as_str()))
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;

        let current = document.stock.unwrap_or(0).max(0);
        document.stock = Some(update(current)?);
        write_json(&self.path, &documents).await
    }
}

#[async_trait]
impl CatalogStore for FileCatalog {
    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let documents = self.documents().await?;
        Ok(self.to_products(documents))
    }

    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        let products = self.list_products().await?;
        Ok(products.into_iter().find(|p| &p.id == id))
    }

    async fn reserve_stock(&self, id: &ProductId, quantity: u32) -> Result<(), StoreError> {
        let requested = i64::from(quantity);
        self.update_stock(id, |current| {
            if current < requested {
                return Err(StoreError::InsufficientStock {
                    product_id: id.clone(),
                    requested: quantity,
                    available: u32::try_from(current).unwrap_or(0),
                });
            }
            Ok(current - requested)
        })
        .await?;
        debug!(product_id = %id, quantity, "Reserved stock");
        Ok(())
    }

    async fn restore_stock(&self, id: &ProductId, quantity: u32) -> Result<(), StoreError> {
        self.update_stock(id, |current| Ok(current + i64::from(quantity)))
            .await?;
        debug!(product_id = %id, quantity, "Restored stock");
        Ok(())
    }
}

// =============================================================================
// Carts
// =============================================================================

/// Cart documents stored as `<dir>/carts/<user>.json`.
pub struct FileCartStore {
    dir: PathBuf,
}

impl FileCartStore {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.join("carts"),
        }
    }

    fn path(&self, user: &UserId) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(user.as_str())))
    }
}

#[async_trait]
impl CartStore for FileCartStore {
    async fn load_cart(&self, user: &UserId) -> Result<Option<CartDocument>, StoreError> {
        read_json(&self.path(user)).await
    }

    async fn save_cart(&self, user: &UserId, items: &[CartLineItem]) -> Result<(), StoreError> {
        let document = CartDocument::new(user.clone(), items.to_vec());
        write_json(&self.path(user), &document).await
    }

    async fn clear_cart(&self, user: &UserId) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path(user)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Local cache
// =============================================================================

/// Local cart snapshot stored as `<dir>/local_cart.json`.
pub struct FileLocalCache {
    path: PathBuf,
}

impl FileLocalCache {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join("local_cart.json"),
        }
    }
}

impl LocalCache for FileLocalCache {
    fn read_snapshot(&self) -> Result<Option<CartSnapshot>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_snapshot(&self, snapshot: &CartSnapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn delete_snapshot(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Orders and notifications stored one file per document.
pub struct FileOrderStore {
    dir: PathBuf,
}

impl FileOrderStore {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Read every stored order for a user, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the orders directory cannot be read or a document
    /// fails to parse.
    pub async fn orders_for(&self, user: &UserId) -> Result<Vec<Order>, StoreError> {
        let dir = self.dir.join("orders");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut orders = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(order) = read_json::<Order>(&path).await?
                && &order.user_id == user
            {
                orders.push(order);
            }
        }
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}

#[async_trait]
impl OrderStore for FileOrderStore {
    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        let path = self.dir.join("orders").join(format!("{}.json", order.id));
        write_json(&path, order).await
    }

    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let path = self
            .dir
            .join("notifications")
            .join(format!("{}.json", notification.id));
        write_json(&path, notification).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use cartkeeper_core::Price;

    fn product(id: &str, stock: u32) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("Product {id}"),
            price: Price::new(Decimal::from(4), CurrencyCode::USD),
            previous_price: None,
            image: Some(format!("{id}.png")),
            category: None,
            stock,
        }
    }

    #[test]
    fn test_file_stem_sanitizes() {
        assert_eq!(file_stem("user-1_a"), "user-1_a");
        assert_eq!(file_stem("../etc/passwd"), "___etc_passwd");
    }

    #[tokio::test]
    async fn test_catalog_reserve_restore() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileCatalog::new(dir.path(), CurrencyCode::USD);
        catalog.import(&[product("a", 2)]).await.unwrap();
        let id = ProductId::new("a");

        catalog.reserve_stock(&id, 2).await.unwrap();
        let err = catalog.reserve_stock(&id, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { available: 0, .. }));

        catalog.restore_stock(&id, 1).await.unwrap();
        let stored = catalog.get_product(&id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 1);
        assert_eq!(stored.image.as_deref(), Some("a.png"));
    }

    #[tokio::test]
    async fn test_catalog_skips_invalid_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("catalog.json"),
            r#"[{"id":"ok","stock":3},{"name":"no id"}]"#,
        )
        .unwrap();

        let catalog = FileCatalog::new(dir.path(), CurrencyCode::USD);
        let products = catalog.list_products().await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].stock, 3);
    }

    #[tokio::test]
    async fn test_missing_catalog_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileCatalog::new(dir.path(), CurrencyCode::USD);
        assert!(catalog.list_products().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cart_store_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCartStore::new(dir.path());
        let user = UserId::new("user/1");
        let items = vec![CartLineItem::from_product(&product("a", 5), 2)];

        store.save_cart(&user, &items).await.unwrap();
        let doc = store.load_cart(&user).await.unwrap().unwrap();
        assert_eq!(doc.into_items(), items);

        store.clear_cart(&user).await.unwrap();
        assert!(store.load_cart(&user).await.unwrap().is_none());
        // Clearing twice is fine
        store.clear_cart(&user).await.unwrap();
    }

    #[test]
    fn test_local_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileLocalCache::new(dir.path());
        assert!(cache.read_snapshot().unwrap().is_none());

        let snapshot = CartSnapshot::new(None, vec![CartLineItem::from_product(&product("a", 1), 1)]);
        cache.write_snapshot(&snapshot).unwrap();
        assert_eq!(cache.read_snapshot().unwrap(), Some(snapshot));

        cache.delete_snapshot().unwrap();
        assert!(cache.read_snapshot().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_orders_for_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOrderStore::new(dir.path());
        let items = vec![CartLineItem::from_product(&product("a", 1), 1)];

        let mine = Order::from_cart(UserId::new("u1"), items.clone(), CurrencyCode::USD);
        let theirs = Order::from_cart(UserId::new("u2"), items, CurrencyCode::USD);
        store.create_order(&mine).await.unwrap();
        store.create_order(&theirs).await.unwrap();
        store
            .create_notification(&Notification::order_placed(&mine))
            .await
            .unwrap();

        let orders = store.orders_for(&UserId::new("u1")).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, mine.id);
    }
}
