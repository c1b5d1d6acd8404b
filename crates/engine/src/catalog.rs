//! Catalog reads with an in-memory fallback cache.
//!
//! Every listing is fetched fresh from the [`CatalogStore`]; the cache only
//! serves reads when the store fails, so a stale listing is always flagged.
//! Entries expire after the configured TTL (5 minutes by default).

use std::sync::Arc;
use std::time::Duration;

use cartkeeper_core::{Product, ProductId};
use moka::future::Cache;
use tracing::{debug, instrument, warn};

use crate::store::{CatalogStore, StoreError};

/// Cache key for catalog reads.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum CacheKey {
    Product(ProductId),
    Products,
}

/// Cached value types.
#[derive(Debug, Clone)]
enum CacheValue {
    Product(Box<Product>),
    Products(Arc<[Product]>),
}

/// Result of a catalog listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRead {
    pub products: Vec<Product>,
    /// True when the store failed and the listing came from cache.
    pub stale: bool,
}

// =============================================================================
// CatalogCache
// =============================================================================

/// Catalog reader shared by the engine and its callers.
#[derive(Clone)]
pub struct CatalogCache {
    inner: Arc<CatalogCacheInner>,
}

struct CatalogCacheInner {
    store: Arc<dyn CatalogStore>,
    cache: Cache<CacheKey, CacheValue>,
}

impl std::fmt::Debug for CatalogCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogCache")
            .field("entries", &self.inner.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl CatalogCache {
    /// Create a catalog cache in front of `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>, ttl: Duration, capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self {
            inner: Arc::new(CatalogCacheInner { store, cache }),
        }
    }

    /// The underlying store, for stock reservations.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.inner.store
    }

    /// List every product.
    ///
    /// # Errors
    ///
    /// Returns the store error if the read fails and nothing is cached.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<CatalogRead, StoreError> {
        match self.inner.store.list_products().await {
            Ok(products) => {
                debug!(count = products.len(), "Catalog refreshed");
                for product in &products {
                    self.inner
                        .cache
                        .insert(
                            CacheKey::Product(product.id.clone()),
                            CacheValue::Product(Box::new(product.clone())),
                        )
                        .await;
                }
                self.inner
                    .cache
                    .insert(
                        CacheKey::Products,
                        CacheValue::Products(Arc::from(products.as_slice())),
                    )
                    .await;
                Ok(CatalogRead {
                    products,
                    stale: false,
                })
            }
            Err(e) => {
                if let Some(CacheValue::Products(products)) =
                    self.inner.cache.get(&CacheKey::Products).await
                {
                    warn!(error = %e, count = products.len(), "Catalog read failed, serving cached listing");
                    return Ok(CatalogRead {
                        products: products.to_vec(),
                        stale: true,
                    });
                }
                Err(e)
            }
        }
    }

    /// Product by id from cache, without touching the store.
    pub async fn cached(&self, id: &ProductId) -> Option<Product> {
        match self.inner.cache.get(&CacheKey::Product(id.clone())).await {
            Some(CacheValue::Product(product)) => Some(*product),
            _ => None,
        }
    }

    /// Product by id, from cache or the store.
    ///
    /// # Errors
    ///
    /// Returns the store error if the product is not cached and the read fails.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn product(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        if let Some(product) = self.cached(id).await {
            return Ok(Some(product));
        }

        let product = self.inner.store.get_product(id).await?;
        if let Some(product) = &product {
            self.inner
                .cache
                .insert(
                    CacheKey::Product(id.clone()),
                    CacheValue::Product(Box::new(product.clone())),
                )
                .await;
        }
        Ok(product)
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.inner.cache.invalidate_all();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartkeeper_core::{CurrencyCode, Price};
    use rust_decimal::Decimal;

    use super::*;
    use crate::store::memory::{Fault, InMemoryCatalog};

    fn product(id: &str, stock: u32) -> Product {
        Product {
            id: ProductId::new(id),
            name: id.to_uppercase(),
            price: Price::new(Decimal::TEN, CurrencyCode::USD),
            previous_price: None,
            image: None,
            category: None,
            stock,
        }
    }

    fn setup() -> (Arc<InMemoryCatalog>, CatalogCache) {
        let store = Arc::new(InMemoryCatalog::new([product("a", 3), product("b", 0)]));
        let cache = CatalogCache::new(store.clone(), Duration::from_secs(60), 100);
        (store, cache)
    }

    #[tokio::test]
    async fn test_refresh_reads_fresh() {
        let (store, cache) = setup();
        let read = cache.refresh().await.unwrap();
        assert!(!read.stale);
        assert_eq!(read.products.len(), 2);

        store.upsert(product("a", 1));
        let read = cache.refresh().await.unwrap();
        let a = read.products.iter().find(|p| p.id.as_str() == "a").unwrap();
        assert_eq!(a.stock, 1);
    }

    #[tokio::test]
    async fn test_refresh_falls_back_to_cache() {
        let (store, cache) = setup();
        cache.refresh().await.unwrap();

        store.fail_reads(Some(Fault::Unavailable));
        let read = cache.refresh().await.unwrap();
        assert!(read.stale);
        assert_eq!(read.products.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_fails_without_cache() {
        let (store, cache) = setup();
        store.fail_reads(Some(Fault::Unavailable));
        assert!(cache.refresh().await.is_err());
    }

    #[tokio::test]
    async fn test_product_is_cached_after_lookup() {
        let (store, cache) = setup();
        let id = ProductId::new("a");
        assert!(cache.cached(&id).await.is_none());

        assert_eq!(cache.product(&id).await.unwrap().unwrap().stock, 3);
        store.fail_reads(Some(Fault::Unavailable));
        assert!(cache.product(&id).await.unwrap().is_some());
        assert!(cache.product(&ProductId::new("zzz")).await.is_err());
    }
}
