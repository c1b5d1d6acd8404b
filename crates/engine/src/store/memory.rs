//! In-memory collaborators.
//!
//! Used by tests and by callers that embed the engine without a remote
//! store. Each store records how often it was called and can be told to fail,
//! so tests can exercise the engine's failure paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cartkeeper_core::{
    CartDocument, CartLineItem, CartSnapshot, Notification, Order, Product, ProductId, UserId,
};
use tokio::sync::Notify;

use super::{CartStore, CatalogStore, LocalCache, OrderStore, StoreError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Failure injected into an in-memory store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The store behaves as if it were unreachable.
    Unavailable,
    /// The store rejects the caller's identity.
    Unauthorized,
}

impl Fault {
    fn into_error(self, call: &str) -> StoreError {
        match self {
            Self::Unavailable => StoreError::Unavailable(format!("{call} failed (injected)")),
            Self::Unauthorized => StoreError::Unauthorized(format!("{call} rejected (injected)")),
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Default)]
struct CatalogFaults {
    reads: Option<Fault>,
    reserves: Option<Fault>,
    restores: Option<Fault>,
}

/// Product catalog held in memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    products: Mutex<BTreeMap<ProductId, Product>>,
    faults: Mutex<CatalogFaults>,
    reserve_gate: Mutex<Option<Arc<Notify>>>,
    restore_gate: Mutex<Option<Arc<Notify>>>,
    reserve_calls: AtomicUsize,
    restore_calls: AtomicUsize,
}

impl InMemoryCatalog {
    /// Create a catalog holding `products`.
    #[must_use]
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Self::default();
        for product in products {
            catalog.upsert(product);
        }
        catalog
    }

    /// Insert or replace a product.
    pub fn upsert(&self, product: Product) {
        lock(&self.products).insert(product.id.clone(), product);
    }

    /// Current remote stock for a product.
    #[must_use]
    pub fn stock(&self, id: &ProductId) -> Option<u32> {
        lock(&self.products).get(id).map(|p| p.stock)
    }

    /// Make catalog reads fail until cleared with `None`.
    pub fn fail_reads(&self, fault: Option<Fault>) {
        lock(&self.faults).reads = fault;
    }

    /// Make stock reservations fail until cleared with `None`.
    pub fn fail_reserves(&self, fault: Option<Fault>) {
        lock(&self.faults).reserves = fault;
    }

    /// Make stock restorations fail until cleared with `None`.
    pub fn fail_restores(&self, fault: Option<Fault>) {
        lock(&self.faults).restores = fault;
    }

    /// Suspend every reservation until `gate` is notified once per call.
    pub fn gate_reserves(&self, gate: Arc<Notify>) {
        *lock(&self.reserve_gate) = Some(gate);
    }

    /// Suspend every restoration until `gate` is notified once per call.
    pub fn gate_restores(&self, gate: Arc<Notify>) {
        *lock(&self.restore_gate) = Some(gate);
    }

    /// Number of reservation calls received.
    #[must_use]
    pub fn reserve_calls(&self) -> usize {
        self.reserve_calls.load(Ordering::SeqCst)
    }

    /// Number of restoration calls received.
    #[must_use]
    pub fn restore_calls(&self) -> usize {
        self.restore_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        if let Some(fault) = lock(&self.faults).reads {
            return Err(fault.into_error("list_products"));
        }
        Ok(lock(&self.products).values().cloned().collect())
    }

    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        if let Some(fault) = lock(&self.faults).reads {
            return Err(fault.into_error("get_product"));
        }
        Ok(lock(&self.products).get(id).cloned())
    }

    async fn reserve_stock(&self, id: &ProductId, quantity: u32) -> Result<(), StoreError> {
        self.reserve_calls.fetch_add(1, Ordering::SeqCst);

        let gate = lock(&self.reserve_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(fault) = lock(&self.faults).reserves {
            return Err(fault.into_error("reserve_stock"));
        }

        let mut products = lock(&self.products);
        let product = products
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
        if product.stock < quantity {
            return Err(StoreError::InsufficientStock {
                product_id: id.clone(),
                requested: quantity,
                available: product.stock,
            });
        }
        product.stock -= quantity;
        Ok(())
    }

    async fn restore_stock(&self, id: &ProductId, quantity: u32) -> Result<(), StoreError> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);

        let gate = lock(&self.restore_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(fault) = lock(&self.faults).restores {
            return Err(fault.into_error("restore_stock"));
        }

        let mut products = lock(&self.products);
        let product = products
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
        product.stock = product.stock.saturating_add(quantity);
        Ok(())
    }
}

// =============================================================================
// Carts
// =============================================================================

/// Remote cart documents held in memory.
#[derive(Default)]
pub struct InMemoryCartStore {
    documents: Mutex<HashMap<UserId, CartDocument>>,
    fault: Mutex<Option<Fault>>,
    calls: AtomicUsize,
}

impl InMemoryCartStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document directly, bypassing call accounting.
    pub fn insert(&self, user: UserId, document: CartDocument) {
        lock(&self.documents).insert(user, document);
    }

    /// Current document for a user.
    #[must_use]
    pub fn document(&self, user: &UserId) -> Option<CartDocument> {
        lock(&self.documents).get(user).cloned()
    }

    /// Make every call fail until cleared with `None`.
    pub fn fail_with(&self, fault: Option<Fault>) {
        *lock(&self.fault) = fault;
    }

    /// Number of calls of any kind received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, call: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match *lock(&self.fault) {
            Some(fault) => Err(fault.into_error(call)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn load_cart(&self, user: &UserId) -> Result<Option<CartDocument>, StoreError> {
        self.enter("load_cart")?;
        Ok(lock(&self.documents).get(user).cloned())
    }

    async fn save_cart(&self, user: &UserId, items: &[CartLineItem]) -> Result<(), StoreError> {
        self.enter("save_cart")?;
        let document = CartDocument::new(user.clone(), items.to_vec());
        lock(&self.documents).insert(user.clone(), document);
        Ok(())
    }

    async fn clear_cart(&self, user: &UserId) -> Result<(), StoreError> {
        self.enter("clear_cart")?;
        lock(&self.documents).remove(user);
        Ok(())
    }
}

// =============================================================================
// Local cache
// =============================================================================

/// Local cache entry held in memory as serialized JSON, like browser storage.
#[derive(Default)]
pub struct InMemoryLocalCache {
    raw: Mutex<Option<String>>,
    fault: Mutex<Option<Fault>>,
}

impl InMemoryLocalCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored entry exactly as written.
    #[must_use]
    pub fn raw(&self) -> Option<String> {
        lock(&self.raw).clone()
    }

    /// Replace the stored entry, e.g. with a document from an older release.
    pub fn set_raw(&self, raw: Option<String>) {
        *lock(&self.raw) = raw;
    }

    /// Make every call fail until cleared with `None`.
    pub fn fail_with(&self, fault: Option<Fault>) {
        *lock(&self.fault) = fault;
    }

    fn check(&self, call: &str) -> Result<(), StoreError> {
        match *lock(&self.fault) {
            Some(fault) => Err(fault.into_error(call)),
            None => Ok(()),
        }
    }
}

impl LocalCache for InMemoryLocalCache {
    fn read_snapshot(&self) -> Result<Option<CartSnapshot>, StoreError> {
        self.check("read_snapshot")?;
        lock(&self.raw)
            .as_deref()
            .map(|raw| serde_json::from_str::<CartSnapshot>(raw))
            .transpose()
            .map_err(StoreError::from)
    }

    fn write_snapshot(&self, snapshot: &CartSnapshot) -> Result<(), StoreError> {
        self.check("write_snapshot")?;
        let raw = serde_json::to_string(snapshot)?;
        *lock(&self.raw) = Some(raw);
        Ok(())
    }

    fn delete_snapshot(&self) -> Result<(), StoreError> {
        self.check("delete_snapshot")?;
        *lock(&self.raw) = None;
        Ok(())
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Orders and notifications held in memory.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<Vec<Order>>,
    notifications: Mutex<Vec<Notification>>,
    order_fault: Mutex<Option<Fault>>,
    notification_fault: Mutex<Option<Fault>>,
    order_gate: Mutex<Option<Arc<Notify>>>,
}

impl InMemoryOrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All orders created so far.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        lock(&self.orders).clone()
    }

    /// All notifications created so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    /// Make order creation fail until cleared with `None`.
    pub fn fail_orders(&self, fault: Option<Fault>) {
        *lock(&self.order_fault) = fault;
    }

    /// Make notification creation fail until cleared with `None`.
    pub fn fail_notifications(&self, fault: Option<Fault>) {
        *lock(&self.notification_fault) = fault;
    }

    /// Suspend every order creation until `gate` is notified once per call.
    pub fn gate_orders(&self, gate: Arc<Notify>) {
        *lock(&self.order_gate) = Some(gate);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        let gate = lock(&self.order_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(fault) = *lock(&self.order_fault) {
            return Err(fault.into_error("create_order"));
        }
        lock(&self.orders).push(order.clone());
        Ok(())
    }

    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        if let Some(fault) = *lock(&self.notification_fault) {
            return Err(fault.into_error("create_notification"));
        }
        lock(&self.notifications).push(notification.clone());
        Ok(())
    }
}
