//! Integration tests for Cartkeeper.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartkeeper-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `cart_properties` - stock, guard and totals guarantees of the engine
//! - `session_lifecycle` - loading, sign-in/sign-out, fallbacks, teardown
//! - `checkout_flow` - orders, including a run against the JSON-file stores
//!
//! Everything here runs in-process against the in-memory stores; no external
//! services are needed.

use std::sync::Arc;

use cartkeeper_core::{CurrencyCode, Price, Product, ProductId, UserId};
use cartkeeper_engine::store::memory::{
    InMemoryCartStore, InMemoryCatalog, InMemoryLocalCache, InMemoryOrderStore,
};
use cartkeeper_engine::{CartEngine, Collaborators, EngineConfig, IdentityService};
use rust_decimal::Decimal;

/// Build a catalog product priced in whole currency units.
#[must_use]
pub fn product(id: &str, price: i64, stock: u32) -> Product {
    Product {
        id: ProductId::new(id),
        name: format!("Product {id}"),
        price: Price::new(Decimal::from(price), CurrencyCode::USD),
        previous_price: None,
        image: Some(format!("/images/{id}.jpg")),
        category: Some("apparel".to_string()),
        stock,
    }
}

/// One shopper session wired to in-memory stores.
pub struct TestContext {
    pub catalog: Arc<InMemoryCatalog>,
    pub carts: Arc<InMemoryCartStore>,
    pub local: Arc<InMemoryLocalCache>,
    pub orders: Arc<InMemoryOrderStore>,
    pub identity: Arc<IdentityService>,
    pub config: EngineConfig,
    pub engine: CartEngine,
}

impl TestContext {
    /// Guest session over a fresh catalog.
    #[must_use]
    pub fn guest(products: Vec<Product>) -> Self {
        Self::build(products, None, EngineConfig::default())
    }

    /// Signed-in session over a fresh catalog.
    #[must_use]
    pub fn signed_in(user: &str, products: Vec<Product>) -> Self {
        Self::build(products, Some(user), EngineConfig::default())
    }

    /// Session with an explicit configuration.
    #[must_use]
    pub fn build(products: Vec<Product>, user: Option<&str>, config: EngineConfig) -> Self {
        let catalog = Arc::new(InMemoryCatalog::new(products));
        let carts = Arc::new(InMemoryCartStore::new());
        let local = Arc::new(InMemoryLocalCache::new());
        let orders = Arc::new(InMemoryOrderStore::new());
        let identity = Arc::new(
            user.map_or_else(IdentityService::new, |u| IdentityService::signed_in(UserId::new(u))),
        );
        let engine = Self::engine(&catalog, &carts, &local, &orders, &identity, &config);

        Self {
            catalog,
            carts,
            local,
            orders,
            identity,
            config,
            engine,
        }
    }

    /// A new engine over the same stores, as after restarting the app.
    #[must_use]
    pub fn restart(&self) -> CartEngine {
        Self::engine(
            &self.catalog,
            &self.carts,
            &self.local,
            &self.orders,
            &self.identity,
            &self.config,
        )
    }

    /// Another shopper on another device: same catalog, own cart stores.
    #[must_use]
    pub fn other_shopper(&self, user: &str) -> Self {
        let carts = Arc::new(InMemoryCartStore::new());
        let local = Arc::new(InMemoryLocalCache::new());
        let orders = Arc::new(InMemoryOrderStore::new());
        let identity = Arc::new(IdentityService::signed_in(UserId::new(user)));
        let engine = Self::engine(&self.catalog, &carts, &local, &orders, &identity, &self.config);

        Self {
            catalog: Arc::clone(&self.catalog),
            carts,
            local,
            orders,
            identity,
            config: self.config.clone(),
            engine,
        }
    }

    fn engine(
        catalog: &Arc<InMemoryCatalog>,
        carts: &Arc<InMemoryCartStore>,
        local: &Arc<InMemoryLocalCache>,
        orders: &Arc<InMemoryOrderStore>,
        identity: &Arc<IdentityService>,
        config: &EngineConfig,
    ) -> CartEngine {
        CartEngine::new(
            config.clone(),
            Collaborators {
                catalog: catalog.clone(),
                carts: carts.clone(),
                local: local.clone(),
                identity: identity.clone(),
                orders: Some(orders.clone()),
            },
        )
    }
}
