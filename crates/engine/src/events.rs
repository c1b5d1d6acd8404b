//! Typed event channel for cart outcomes.
//!
//! The engine publishes one event per operation outcome plus warnings for
//! background failures. Presentation code subscribes and decides how to show
//! them (toast, badge, nothing); the engine never renders anything itself.

use cartkeeper_core::ProductId;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Mutating operation an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CartOperation {
    AddItem,
    RemoveItem,
    SetQuantity,
    ClearCart,
    Checkout,
}

/// Why an operation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureReason {
    InsufficientStock { requested: u32, available: u32 },
    Busy,
    NotFound,
    EmptyCart,
    SignInRequired,
    Unavailable,
    Remote { message: String },
}

/// Background write that failed after the local outcome was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceTarget {
    LocalCache,
    RemoteCart,
    Notification,
}

/// What a failed load was reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadTarget {
    Cart,
    Catalog,
}

/// Event published by the cart engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum CartEvent {
    /// An operation completed and the cart reflects it.
    OperationSucceeded {
        operation: CartOperation,
        product_id: Option<ProductId>,
    },
    /// An operation was rejected; the cart is unchanged.
    OperationFailed {
        operation: CartOperation,
        product_id: Option<ProductId>,
        reason: FailureReason,
    },
    /// Stock could not be given back to the remote counter.
    RestockWarning {
        product_id: ProductId,
        quantity: u32,
        message: String,
    },
    /// The cart could not be written to one of its stores.
    PersistenceWarning {
        target: PersistenceTarget,
        message: String,
    },
    /// A load failed. `fell_back` is true when cached data was used instead.
    LoadFailed {
        target: LoadTarget,
        message: String,
        fell_back: bool,
    },
}

impl CartEvent {
    /// Whether this event reports a problem.
    #[must_use]
    pub const fn is_warning(&self) -> bool {
        !matches!(self, Self::OperationSucceeded { .. })
    }
}

/// Broadcast sender shared by the engine's components.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CartEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: CartEvent) {
        if self.sender.send(event).is_err() {
            trace!("Cart event dropped, no subscribers");
        }
    }

    /// Receive events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.sender.subscribe()
    }
}
