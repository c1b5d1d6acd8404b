//! The cart engine.
//!
//! [`CartEngine`] owns the in-memory line items and the [`StockLedger`] for one
//! session. Every mutation follows the same shape: take the product's
//! [`OperationGuard`] permit, run the remote stock call, apply the local change
//! in one critical section, then persist and publish the outcome.
//!
//! Growing a reservation (add, quantity increase) aborts on remote failure and
//! leaves no local trace. Shrinking it (remove, decrease, clear) always
//! succeeds locally; restore failures become [`CartEvent::RestockWarning`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cartkeeper_core::{CartLineItem, GuestStockPolicy, Price, Product, ProductId, UserId};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::catalog::CatalogCache;
use crate::config::EngineConfig;
use crate::error::{CartError, Result};
use crate::events::{CartEvent, CartOperation, EventBus, LoadTarget};
use crate::guard::{GuardPermit, OperationGuard};
use crate::ledger::StockLedger;
use crate::persistence::{CartSource, Persistence};
use crate::store::{CartStore, CatalogStore, IdentityProvider, LocalCache, OrderStore, StoreError};

/// External services the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogStore>,
    pub carts: Arc<dyn CartStore>,
    pub local: Arc<dyn LocalCache>,
    pub identity: Arc<dyn IdentityProvider>,
    /// Needed only for checkout.
    pub orders: Option<Arc<dyn OrderStore>>,
}

#[derive(Debug, Default)]
struct CartState {
    items: Vec<CartLineItem>,
    ledger: StockLedger,
    closed: bool,
}

impl CartState {
    fn quantity_of(&self, id: &ProductId) -> Option<u32> {
        self.items
            .iter()
            .find(|item| &item.product_id == id)
            .map(|item| item.quantity)
    }

    fn line_mut(&mut self, id: &ProductId) -> Option<&mut CartLineItem> {
        self.items.iter_mut().find(|item| &item.product_id == id)
    }
}

// =============================================================================
// CartEngine
// =============================================================================

/// Cart service for one session.
///
/// Cheap to clone; clones share the same cart.
#[derive(Clone)]
pub struct CartEngine {
    inner: Arc<CartEngineInner>,
}

pub(crate) struct CartEngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) catalog: CatalogCache,
    pub(crate) persistence: Persistence,
    pub(crate) identity: Arc<dyn IdentityProvider>,
    pub(crate) orders: Option<Arc<dyn OrderStore>>,
    pub(crate) guard: OperationGuard,
    pub(crate) events: EventBus,
    state: Mutex<CartState>,
}

impl std::fmt::Debug for CartEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartEngine")
            .field("config", &self.inner.config)
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

impl CartEngine {
    /// Create an engine with an empty cart. Call [`CartEngine::init`] to load.
    #[must_use]
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let events = EventBus::new(config.event_buffer);
        let catalog = CatalogCache::new(
            collaborators.catalog,
            config.catalog_cache_ttl,
            config.catalog_cache_capacity,
        );
        let persistence = Persistence::new(collaborators.local, collaborators.carts, events.clone());

        Self {
            inner: Arc::new(CartEngineInner {
                config,
                catalog,
                persistence,
                identity: collaborators.identity,
                orders: collaborators.orders,
                guard: OperationGuard::new(),
                events,
                state: Mutex::new(CartState::default()),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &CartEngineInner {
        &self.inner
    }

    fn state(&self) -> MutexGuard<'_, CartState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn current_user(&self) -> Option<UserId> {
        self.inner.identity.current_user_id()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.state().closed {
            return Err(CartError::Closed);
        }
        Ok(())
    }

    pub(crate) fn acquire(&self, id: &ProductId) -> Result<GuardPermit> {
        self.inner
            .guard
            .try_acquire(id)
            .ok_or_else(|| CartError::OperationBusy(id.clone()))
    }

    /// Publish the outcome of a mutating operation.
    pub(crate) fn report<T>(
        &self,
        operation: CartOperation,
        product_id: Option<&ProductId>,
        result: &Result<T>,
    ) {
        let event = match result {
            Ok(_) => CartEvent::OperationSucceeded {
                operation,
                product_id: product_id.cloned(),
            },
            Err(err) => {
                if err.is_user_visible() {
                    info!(?operation, error = %err, "Cart operation rejected");
                } else {
                    debug!(?operation, error = %err, "Cart operation rejected");
                }
                CartEvent::OperationFailed {
                    operation,
                    product_id: product_id.cloned(),
                    reason: err.reason(),
                }
            }
        };
        self.inner.events.emit(event);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load the cart for the current identity, then sync the catalog.
    ///
    /// A catalog failure does not fail initialization; it is published as
    /// [`CartEvent::LoadFailed`] and the caller may retry with
    /// [`CartEngine::sync_catalog`].
    #[instrument(skip(self))]
    pub async fn init(&self) -> CartSource {
        let source = self.reload().await;
        if let Err(e) = self.sync_catalog().await {
            debug!(error = %e, "Catalog unavailable at init");
        }
        source
    }

    /// Replace the in-memory cart with the stored one.
    ///
    /// The ledger is emptied; the next catalog sync reseeds it.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> CartSource {
        let user = self.current_user();
        let loaded = self.inner.persistence.load(user.as_ref()).await;
        {
            let mut state = self.state();
            state.items = loaded.items;
            state.ledger.reset();
        }
        info!(source = ?loaded.source, items = self.state().items.len(), "Cart loaded");
        loaded.source
    }

    /// Fetch the catalog and reseed the ledger from it.
    ///
    /// The ledger is only reseeded from a fresh read. When the store fails
    /// the last cached listing is returned and [`CartEvent::LoadFailed`] is
    /// published with `fell_back: true`.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Remote` if the store fails and nothing is cached.
    #[instrument(skip(self))]
    pub async fn sync_catalog(&self) -> Result<Vec<Product>> {
        match self.inner.catalog.refresh().await {
            Ok(read) if read.stale => {
                self.inner.events.emit(CartEvent::LoadFailed {
                    target: LoadTarget::Catalog,
                    message: "catalog store unreachable, showing cached products".to_string(),
                    fell_back: true,
                });
                Ok(read.products)
            }
            Ok(read) => {
                let mut state = self.state();
                let CartState { items, ledger, .. } = &mut *state;
                ledger.seed(&read.products, items);
                debug!(products = read.products.len(), "Ledger seeded");
                drop(state);
                Ok(read.products)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load catalog");
                self.inner.events.emit(CartEvent::LoadFailed {
                    target: LoadTarget::Catalog,
                    message: e.to_string(),
                    fell_back: false,
                });
                Err(CartError::Remote(e))
            }
        }
    }

    /// React to the identity switching to an authenticated user.
    ///
    /// The in-memory guest cart is merged into the user's remote cart so it
    /// survives login.
    #[instrument(skip(self))]
    pub async fn handle_sign_in(&self) -> CartSource {
        let Some(user) = self.current_user() else {
            return self.reload().await;
        };

        let guest_items = self.items();
        let loaded = self.inner.persistence.adopt(&user, guest_items).await;
        {
            let mut state = self.state();
            state.items = loaded.items;
            state.ledger.reset();
        }
        if let Err(e) = self.sync_catalog().await {
            debug!(error = %e, "Catalog unavailable after sign-in");
        }
        loaded.source
    }

    /// React to the identity switching back to a guest.
    ///
    /// The cart is left untouched and mirrored locally as a guest cart.
    #[instrument(skip(self))]
    pub fn handle_sign_out(&self) {
        let items = self.items();
        self.inner.persistence.write_local(None, &items);
    }

    /// End the session: write the final local snapshot and reject further
    /// mutations with `CartError::Closed`.
    #[instrument(skip(self))]
    pub fn teardown(&self) {
        let items = {
            let mut state = self.state();
            state.closed = true;
            state.items.clone()
        };
        let user = self.current_user();
        self.inner.persistence.write_local(user.as_ref(), &items);
        info!(items = items.len(), "Cart session closed");
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current line items.
    #[must_use]
    pub fn items(&self) -> Vec<CartLineItem> {
        self.state().items.clone()
    }

    /// Sum of line quantities.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.state()
            .items
            .iter()
            .fold(0u32, |acc, item| acc.saturating_add(item.quantity))
    }

    /// Sum of unit price times quantity, in the configured currency.
    #[must_use]
    pub fn total_price(&self) -> Price {
        let amount = self
            .state()
            .items
            .iter()
            .map(|item| item.line_total().amount)
            .fold(Decimal::ZERO, |acc, amount| acc + amount);
        Price::new(amount, self.inner.config.currency)
    }

    /// Remaining stock to offer for `id`, or `fallback` if the ledger has no
    /// entry for it.
    #[must_use]
    pub fn updated_stock(&self, id: &ProductId, fallback: u32) -> u32 {
        self.state().ledger.read(id, fallback)
    }

    /// Whether a mutation on `id` is in flight.
    #[must_use]
    pub fn is_operation_in_progress(&self, id: &ProductId) -> bool {
        self.inner.guard.is_held(id)
    }

    /// Subscribe to operation outcomes and warnings.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.inner.events.subscribe()
    }

    /// The engine's catalog reader.
    #[must_use]
    pub fn catalog(&self) -> &CatalogCache {
        &self.inner.catalog
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add one unit of `product`.
    ///
    /// # Errors
    ///
    /// - `OperationBusy` if an operation on the product is in flight
    /// - `InsufficientStock` if no unit is left to offer
    /// - `Remote` if an authenticated reservation fails
    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn add_item(&self, product: &Product) -> Result<CartLineItem> {
        let result = self.try_add_item(product).await;
        self.report(CartOperation::AddItem, Some(&product.id), &result);
        result
    }

    async fn try_add_item(&self, product: &Product) -> Result<CartLineItem> {
        self.ensure_open()?;
        let _permit = self.acquire(&product.id)?;
        let user = self.current_user();

        // A sold-out read from the catalog wins over an older ledger seed
        let available = if product.stock == 0 {
            0
        } else {
            let state = self.state();
            let in_cart = state.quantity_of(&product.id).unwrap_or(0);
            state
                .ledger
                .read(&product.id, product.stock.saturating_sub(in_cart))
        };
        if available == 0 {
            return Err(CartError::InsufficientStock {
                product_id: product.id.clone(),
                requested: 1,
                available: 0,
            });
        }

        self.reserve(user.as_ref(), &product.id, 1).await?;

        let (line, items) = {
            let mut state = self.state();
            let in_cart = state.quantity_of(&product.id).unwrap_or(0);
            state
                .ledger
                .adjust_or_insert(&product.id, product.stock.saturating_sub(in_cart), -1);
            let line = if let Some(line) = state.line_mut(&product.id) {
                line.quantity = line.quantity.saturating_add(1);
                line.clone()
            } else {
                let line = CartLineItem::from_product(product, 1);
                state.items.push(line.clone());
                line
            };
            (line, state.items.clone())
        };

        self.inner.persistence.persist(user.as_ref(), &items).await;
        info!(quantity = line.quantity, "Item added to cart");
        Ok(line)
    }

    /// Remove the line for `id` and give its stock back.
    ///
    /// Removing the last line clears the cart.
    ///
    /// # Errors
    ///
    /// - `OperationBusy` if an operation on the product is in flight
    /// - `ItemNotFound` if the product is not in the cart
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn remove_item(&self, id: &ProductId) -> Result<()> {
        let result = self.try_remove_item(id).await;
        self.report(CartOperation::RemoveItem, Some(id), &result);
        result
    }

    async fn try_remove_item(&self, id: &ProductId) -> Result<()> {
        self.ensure_open()?;
        let _permit = self.acquire(id)?;
        let user = self.current_user();
        self.remove_held(user.as_ref(), id).await
    }

    /// Remove a line whose permit the caller holds.
    async fn remove_held(&self, user: Option<&UserId>, id: &ProductId) -> Result<()> {
        enum Removal {
            Line(u32),
            Last(Vec<CartLineItem>),
        }

        let removal = {
            let mut state = self.state();
            let quantity = state
                .quantity_of(id)
                .ok_or_else(|| CartError::ItemNotFound(id.clone()))?;
            if state.items.len() == 1 {
                state.ledger.reset();
                Removal::Last(std::mem::take(&mut state.items))
            } else {
                state.items.retain(|item| &item.product_id != id);
                state.ledger.adjust(id, i64::from(quantity));
                Removal::Line(quantity)
            }
        };

        match removal {
            Removal::Last(taken) => {
                debug!("Last line removed, clearing cart");
                self.finish_clear(user, taken).await;
            }
            Removal::Line(quantity) => {
                self.restore(user, id, quantity).await;
                // Other lines may have changed during the restore
                let items = self.items();
                self.inner.persistence.persist(user, &items).await;
            }
        }
        Ok(())
    }

    /// Set the quantity of the line for `id`. Zero removes the line.
    ///
    /// # Errors
    ///
    /// - `OperationBusy` if an operation on the product is in flight
    /// - `ItemNotFound` if the product is not in the cart
    /// - `InsufficientStock` if the increase exceeds the remaining stock
    /// - `Remote` if an authenticated reservation fails
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn set_quantity(&self, id: &ProductId, quantity: u32) -> Result<()> {
        let result = self.try_set_quantity(id, quantity).await;
        self.report(CartOperation::SetQuantity, Some(id), &result);
        result
    }

    async fn try_set_quantity(&self, id: &ProductId, quantity: u32) -> Result<()> {
        self.ensure_open()?;
        let _permit = self.acquire(id)?;
        let user = self.current_user();

        let current = self
            .state()
            .quantity_of(id)
            .ok_or_else(|| CartError::ItemNotFound(id.clone()))?;

        if quantity == 0 {
            return self.remove_held(user.as_ref(), id).await;
        }
        if quantity == current {
            return Ok(());
        }
        if quantity > current {
            return self.grow(user.as_ref(), id, current, quantity).await;
        }

        let delta = current - quantity;
        {
            let mut state = self.state();
            if let Some(line) = state.line_mut(id) {
                line.quantity = quantity;
            }
            state.ledger.adjust(id, i64::from(delta));
        }
        self.restore(user.as_ref(), id, delta).await;
        let items = self.items();
        self.inner.persistence.persist(user.as_ref(), &items).await;
        Ok(())
    }

    async fn grow(
        &self,
        user: Option<&UserId>,
        id: &ProductId,
        current: u32,
        quantity: u32,
    ) -> Result<()> {
        let delta = quantity - current;

        // Remaining stock the catalog implies when the ledger has no entry
        let catalog_remaining = match self.inner.catalog.product(id).await {
            Ok(product) => product.map(|p| p.stock.saturating_sub(current)),
            Err(e) => {
                debug!(error = %e, "Catalog lookup failed, relying on remote reservation");
                None
            }
        };
        let available = {
            let state = self.state();
            if state.ledger.contains(id) {
                Some(state.ledger.read(id, 0))
            } else {
                catalog_remaining
            }
        };
        if let Some(available) = available
            && delta > available
        {
            return Err(CartError::InsufficientStock {
                product_id: id.clone(),
                requested: delta,
                available,
            });
        }

        self.reserve(user, id, delta).await?;

        let items = {
            let mut state = self.state();
            if let Some(line) = state.line_mut(id) {
                line.quantity = quantity;
                match catalog_remaining {
                    Some(base) => {
                        state.ledger.adjust_or_insert(id, base, -i64::from(delta));
                    }
                    None => {
                        state.ledger.adjust(id, -i64::from(delta));
                    }
                }
                Some(state.items.clone())
            } else {
                None
            }
        };

        // The cart was reloaded while the reservation was in flight
        let Some(items) = items else {
            self.restore(user, id, delta).await;
            return Err(CartError::ItemNotFound(id.clone()));
        };
        self.inner.persistence.persist(user, &items).await;
        Ok(())
    }

    /// Empty the cart and give every line's stock back.
    ///
    /// Holds the operation guard for every line while the stock is restored.
    /// Lines for other products added meanwhile stay in the cart.
    ///
    /// # Errors
    ///
    /// - `OperationBusy` if any line has an operation in flight
    /// - `Closed` after teardown
    #[instrument(skip(self))]
    pub async fn clear_cart(&self) -> Result<()> {
        let result = self.try_clear_cart().await;
        self.report(CartOperation::ClearCart, None, &result);
        result
    }

    async fn try_clear_cart(&self) -> Result<()> {
        self.ensure_open()?;
        let user = self.current_user();
        let ids: Vec<ProductId> = self
            .items()
            .into_iter()
            .map(|item| item.product_id)
            .collect();
        let _permit = self
            .inner
            .guard
            .try_acquire_all(&ids)
            .map_err(CartError::OperationBusy)?;

        let taken = self.take_lines(&ids);
        self.finish_clear(user.as_ref(), taken).await;
        Ok(())
    }

    /// Restore the stock of `taken` lines, then bring storage in line with
    /// whatever the cart holds now.
    async fn finish_clear(&self, user: Option<&UserId>, taken: Vec<CartLineItem>) {
        for item in &taken {
            self.restore(user, &item.product_id, item.quantity).await;
        }

        let items = self.items();
        if items.is_empty() {
            self.inner.persistence.clear(user).await;
        } else {
            self.inner.persistence.persist(user, &items).await;
        }
        info!(lines = taken.len(), remaining = items.len(), "Cart cleared");
    }

    /// Take the lines for `ids` out of the cart without touching stock.
    ///
    /// The ledger is reset once the cart is empty; otherwise only the taken
    /// products are dropped from it.
    pub(crate) fn take_lines(&self, ids: &[ProductId]) -> Vec<CartLineItem> {
        let mut state = self.state();
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.items)
            .into_iter()
            .partition(|item| ids.contains(&item.product_id));
        state.items = kept;
        if state.items.is_empty() {
            state.ledger.reset();
        } else {
            for line in &taken {
                state.ledger.forget(&line.product_id);
            }
        }
        taken
    }

    // =========================================================================
    // Remote stock
    // =========================================================================

    /// Reserve `quantity` units of `id` on the remote counter.
    async fn reserve(&self, user: Option<&UserId>, id: &ProductId, quantity: u32) -> Result<()> {
        let store = self.inner.catalog.store();
        if user.is_some() {
            return store
                .reserve_stock(id, quantity)
                .await
                .map_err(CartError::from);
        }

        match self.inner.config.guest_stock_policy {
            GuestStockPolicy::LocalOnly => Ok(()),
            GuestStockPolicy::ReserveRemote => match store.reserve_stock(id, quantity).await {
                Ok(()) => Ok(()),
                Err(e @ StoreError::InsufficientStock { .. }) => Err(e.into()),
                Err(e) => {
                    warn!(
                        product_id = %id,
                        quantity,
                        error = %e,
                        "Guest reservation unavailable, continuing locally"
                    );
                    Ok(())
                }
            },
        }
    }

    /// Give `quantity` units of `id` back to the remote counter. Best effort.
    async fn restore(&self, user: Option<&UserId>, id: &ProductId, quantity: u32) {
        if quantity == 0 {
            return;
        }
        if user.is_none() && self.inner.config.guest_stock_policy == GuestStockPolicy::LocalOnly {
            return;
        }

        if let Err(e) = self
            .inner
            .catalog
            .store()
            .restore_stock(id, quantity)
            .await
        {
            warn!(product_id = %id, quantity, error = %e, "Failed to restore stock");
            self.inner.events.emit(CartEvent::RestockWarning {
                product_id: id.clone(),
                quantity,
                message: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartkeeper_core::{CartDocument, CurrencyCode};

    use super::*;
    use crate::events::{FailureReason, PersistenceTarget};
    use crate::identity::IdentityService;
    use crate::store::memory::{
        Fault, InMemoryCartStore, InMemoryCatalog, InMemoryLocalCache, InMemoryOrderStore,
    };

    fn product(id: &str, price: i64, stock: u32) -> Product {
        Product {
            id: ProductId::new(id),
            name: id.to_uppercase(),
            price: Price::new(Decimal::from(price), CurrencyCode::USD),
            previous_price: None,
            image: None,
            category: Some("tees".to_string()),
            stock,
        }
    }

    struct Harness {
        catalog: Arc<InMemoryCatalog>,
        carts: Arc<InMemoryCartStore>,
        local: Arc<InMemoryLocalCache>,
        identity: Arc<IdentityService>,
        engine: CartEngine,
    }

    fn harness(products: Vec<Product>, user: Option<&str>, config: EngineConfig) -> Harness {
        let catalog = Arc::new(InMemoryCatalog::new(products));
        let carts = Arc::new(InMemoryCartStore::new());
        let local = Arc::new(InMemoryLocalCache::new());
        let identity = Arc::new(match user {
            Some(user) => IdentityService::signed_in(UserId::new(user)),
            None => IdentityService::new(),
        });
        let engine = CartEngine::new(
            config,
            Collaborators {
                catalog: catalog.clone(),
                carts: carts.clone(),
                local: local.clone(),
                identity: identity.clone(),
                orders: Some(Arc::new(InMemoryOrderStore::new())),
            },
        );
        Harness {
            catalog,
            carts,
            local,
            identity,
            engine,
        }
    }

    fn signed_in(products: Vec<Product>) -> Harness {
        harness(products, Some("u1"), EngineConfig::default())
    }

    #[tokio::test]
    async fn test_add_item_reserves_and_persists() {
        let h = signed_in(vec![product("a", 10, 2)]);
        h.engine.init().await;
        let a = product("a", 10, 2);

        let line = h.engine.add_item(&a).await.unwrap();
        assert_eq!(line.quantity, 1);
        assert_eq!(h.catalog.stock(&a.id), Some(1));
        assert_eq!(h.engine.updated_stock(&a.id, 99), 1);

        let doc = h.carts.document(&UserId::new("u1")).unwrap();
        assert_eq!(doc.items[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_add_item_rejects_beyond_stock() {
        let h = signed_in(vec![product("a", 10, 1)]);
        h.engine.init().await;
        let a = product("a", 10, 1);
        h.engine.add_item(&a).await.unwrap();

        let err = h.engine.add_item(&a).await.unwrap_err();
        assert!(matches!(err, CartError::InsufficientStock { available: 0, .. }));
        assert_eq!(h.engine.total_items(), 1);
        assert_eq!(h.catalog.reserve_calls(), 1);
    }

    #[tokio::test]
    async fn test_add_item_rejects_sold_out_product_over_stale_ledger() {
        let h = harness(vec![product("a", 10, 5)], None, EngineConfig::default());
        h.engine.init().await;
        assert_eq!(h.engine.updated_stock(&ProductId::new("a"), 0), 5);

        let err = h.engine.add_item(&product("a", 10, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            CartError::InsufficientStock {
                requested: 1,
                available: 0,
                ..
            }
        ));
        assert!(h.engine.items().is_empty());
        assert_eq!(h.engine.updated_stock(&ProductId::new("a"), 0), 5);
    }

    #[tokio::test]
    async fn test_add_item_remote_failure_leaves_no_trace() {
        let h = signed_in(vec![product("a", 10, 5)]);
        h.engine.init().await;
        h.catalog.fail_reserves(Some(Fault::Unavailable));
        let mut rx = h.engine.subscribe();

        let err = h.engine.add_item(&product("a", 10, 5)).await.unwrap_err();
        assert!(matches!(err, CartError::Remote(_)));
        assert!(h.engine.items().is_empty());
        assert_eq!(h.engine.updated_stock(&ProductId::new("a"), 0), 5);
        assert!(h.carts.document(&UserId::new("u1")).is_none());
        assert!(matches!(
            rx.recv().await.unwrap(),
            CartEvent::OperationFailed {
                operation: CartOperation::AddItem,
                reason: FailureReason::Remote { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_guest_local_only_skips_remote_stock() {
        let h = harness(vec![product("a", 10, 3)], None, EngineConfig::default());
        h.engine.init().await;
        let a = product("a", 10, 3);

        h.engine.add_item(&a).await.unwrap();
        h.engine.set_quantity(&a.id, 3).await.unwrap();
        assert_eq!(h.catalog.reserve_calls(), 0);
        assert_eq!(h.engine.updated_stock(&a.id, 99), 0);

        h.engine.set_quantity(&a.id, 1).await.unwrap();
        assert_eq!(h.catalog.restore_calls(), 0);
        assert_eq!(h.carts.call_count(), 0);
        assert!(h.local.raw().is_some());
    }

    #[tokio::test]
    async fn test_guest_reserve_remote_proceeds_when_unavailable() {
        let config = EngineConfig {
            guest_stock_policy: GuestStockPolicy::ReserveRemote,
            ..EngineConfig::default()
        };
        let h = harness(vec![product("a", 10, 3)], None, config);
        h.engine.init().await;
        h.catalog.fail_reserves(Some(Fault::Unauthorized));

        h.engine.add_item(&product("a", 10, 3)).await.unwrap();
        assert_eq!(h.catalog.reserve_calls(), 1);
        assert_eq!(h.engine.total_items(), 1);
    }

    #[tokio::test]
    async fn test_set_quantity_grow_and_shrink() {
        let h = signed_in(vec![product("a", 10, 5)]);
        h.engine.init().await;
        let a = product("a", 10, 5);
        h.engine.add_item(&a).await.unwrap();

        h.engine.set_quantity(&a.id, 4).await.unwrap();
        assert_eq!(h.catalog.stock(&a.id), Some(1));
        assert_eq!(h.engine.updated_stock(&a.id, 99), 1);

        let err = h.engine.set_quantity(&a.id, 6).await.unwrap_err();
        assert!(matches!(
            err,
            CartError::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            }
        ));

        h.engine.set_quantity(&a.id, 2).await.unwrap();
        assert_eq!(h.catalog.stock(&a.id), Some(3));
        assert_eq!(h.engine.updated_stock(&a.id, 99), 3);
        assert_eq!(h.engine.total_items(), 2);
    }

    #[tokio::test]
    async fn test_set_quantity_zero_removes() {
        let h = signed_in(vec![product("a", 10, 5), product("b", 10, 5)]);
        h.engine.init().await;
        h.engine.add_item(&product("a", 10, 5)).await.unwrap();
        h.engine.add_item(&product("b", 10, 5)).await.unwrap();

        h.engine.set_quantity(&ProductId::new("a"), 0).await.unwrap();
        assert_eq!(h.engine.items().len(), 1);
        assert_eq!(h.catalog.stock(&ProductId::new("a")), Some(5));
    }

    #[tokio::test]
    async fn test_shrink_survives_restore_failure() {
        let h = signed_in(vec![product("a", 10, 5)]);
        h.engine.init().await;
        let a = product("a", 10, 5);
        h.engine.add_item(&a).await.unwrap();
        h.engine.set_quantity(&a.id, 3).await.unwrap();

        h.catalog.fail_restores(Some(Fault::Unavailable));
        let mut rx = h.engine.subscribe();
        h.engine.set_quantity(&a.id, 1).await.unwrap();

        assert_eq!(h.engine.total_items(), 1);
        assert!(matches!(
            rx.recv().await.unwrap(),
            CartEvent::RestockWarning { quantity: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_item_errors() {
        let h = signed_in(vec![product("a", 10, 5)]);
        let id = ProductId::new("a");
        assert!(matches!(
            h.engine.remove_item(&id).await,
            Err(CartError::ItemNotFound(_))
        ));
        assert!(matches!(
            h.engine.set_quantity(&id, 2).await,
            Err(CartError::ItemNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_cart_restores_each_line() {
        let h = signed_in(vec![product("a", 10, 5), product("b", 10, 5)]);
        h.engine.init().await;
        h.engine.add_item(&product("a", 10, 5)).await.unwrap();
        h.engine.add_item(&product("b", 10, 5)).await.unwrap();
        h.engine.set_quantity(&ProductId::new("b"), 3).await.unwrap();

        h.engine.clear_cart().await.unwrap();
        assert!(h.engine.items().is_empty());
        assert_eq!(h.catalog.stock(&ProductId::new("a")), Some(5));
        assert_eq!(h.catalog.stock(&ProductId::new("b")), Some(5));
        assert!(h.carts.document(&UserId::new("u1")).is_none());
        assert!(h.local.raw().is_none());
    }

    #[tokio::test]
    async fn test_clear_cart_attempts_every_restore() {
        let h = signed_in(vec![product("a", 10, 5), product("b", 10, 5)]);
        h.engine.init().await;
        h.engine.add_item(&product("a", 10, 5)).await.unwrap();
        h.engine.add_item(&product("b", 10, 5)).await.unwrap();
        h.catalog.fail_restores(Some(Fault::Unavailable));

        h.engine.clear_cart().await.unwrap();
        assert_eq!(h.catalog.restore_calls(), 2);
        assert!(h.engine.items().is_empty());
    }

    #[tokio::test]
    async fn test_clear_cart_busy_while_line_locked() {
        let h = signed_in(vec![product("a", 10, 5), product("b", 10, 5)]);
        h.engine.init().await;
        h.engine.add_item(&product("a", 10, 5)).await.unwrap();
        h.engine.add_item(&product("b", 10, 5)).await.unwrap();

        let held = h.engine.inner().guard.try_acquire(&ProductId::new("b")).unwrap();
        let err = h.engine.clear_cart().await.unwrap_err();
        assert!(matches!(err, CartError::OperationBusy(id) if id.as_str() == "b"));
        assert_eq!(h.engine.total_items(), 2);
        assert_eq!(h.catalog.restore_calls(), 0);

        drop(held);
        h.engine.clear_cart().await.unwrap();
        assert!(h.engine.items().is_empty());
        assert!(!h.engine.is_operation_in_progress(&ProductId::new("a")));
    }

    #[tokio::test]
    async fn test_totals() {
        let h = harness(
            vec![product("a", 1000, 5), product("b", 2500, 5)],
            None,
            EngineConfig::default(),
        );
        h.engine.init().await;
        h.engine.add_item(&product("a", 1000, 5)).await.unwrap();
        h.engine.add_item(&product("a", 1000, 5)).await.unwrap();
        h.engine.add_item(&product("b", 2500, 5)).await.unwrap();

        assert_eq!(h.engine.total_items(), 3);
        assert_eq!(h.engine.total_price().amount, Decimal::from(4500));
    }

    #[tokio::test]
    async fn test_teardown_closes_session() {
        let h = signed_in(vec![product("a", 10, 5)]);
        h.engine.init().await;
        h.engine.add_item(&product("a", 10, 5)).await.unwrap();

        h.engine.teardown();
        let err = h.engine.add_item(&product("a", 10, 5)).await.unwrap_err();
        assert!(matches!(err, CartError::Closed));
        assert!(h.local.raw().is_some());
    }

    #[tokio::test]
    async fn test_sign_in_adopts_guest_cart() {
        let h = harness(vec![product("a", 10, 5)], None, EngineConfig::default());
        h.engine.init().await;
        h.engine.add_item(&product("a", 10, 5)).await.unwrap();
        let user = UserId::new("u1");
        h.carts
            .insert(user.clone(), CartDocument::new(user.clone(), Vec::new()));

        h.identity.sign_in(user.clone());
        let source = h.engine.handle_sign_in().await;

        assert_eq!(source, CartSource::GuestAdopted);
        assert_eq!(h.carts.document(&user).unwrap().items.len(), 1);
        assert_eq!(h.engine.total_items(), 1);
    }

    #[tokio::test]
    async fn test_sign_out_keeps_cart() {
        let h = signed_in(vec![product("a", 10, 5)]);
        h.engine.init().await;
        h.engine.add_item(&product("a", 10, 5)).await.unwrap();

        h.identity.sign_out();
        h.engine.handle_sign_out();
        assert_eq!(h.engine.total_items(), 1);
        assert!(!h.local.raw().unwrap().contains("userId\":\"u1"));
    }

    #[tokio::test]
    async fn test_catalog_failure_at_init() {
        let h = signed_in(vec![product("a", 10, 5)]);
        h.catalog.fail_reads(Some(Fault::Unavailable));
        let mut rx = h.engine.subscribe();

        assert_eq!(h.engine.init().await, CartSource::Empty);
        assert!(matches!(
            rx.recv().await.unwrap(),
            CartEvent::LoadFailed {
                target: LoadTarget::Catalog,
                fell_back: false,
                ..
            }
        ));

        h.catalog.fail_reads(None);
        assert_eq!(h.engine.sync_catalog().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_save_failure_does_not_fail_add() {
        let h = signed_in(vec![product("a", 10, 5)]);
        h.engine.init().await;
        h.carts.fail_with(Some(Fault::Unavailable));
        let mut rx = h.engine.subscribe();

        h.engine.add_item(&product("a", 10, 5)).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            CartEvent::PersistenceWarning {
                target: PersistenceTarget::RemoteCart,
                ..
            }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CartEvent::OperationSucceeded {
                operation: CartOperation::AddItem,
                ..
            }
        ));
    }
}
