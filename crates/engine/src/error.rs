//! Error types for cart operations.
//!
//! Only failures that abort an operation are returned to the caller. Failures
//! after the local outcome is already decided (restoring stock, writing the
//! cart back) are logged and published on the event channel instead, see
//! [`crate::events::CartEvent`].

use cartkeeper_core::ProductId;
use thiserror::Error;

use crate::events::FailureReason;
use crate::store::StoreError;

/// Errors returned by [`crate::CartEngine`] operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// The reservation would exceed the known remaining stock.
    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Another operation on the same product is still in flight.
    #[error("an operation on {0} is already in progress")]
    OperationBusy(ProductId),

    /// The product has no line in the cart.
    #[error("{0} is not in the cart")]
    ItemNotFound(ProductId),

    /// Checkout requested on an empty cart.
    #[error("cart is empty")]
    EmptyCart,

    /// The operation requires an authenticated identity.
    #[error("sign in required")]
    SignInRequired,

    /// No order store was configured for this engine.
    #[error("checkout is not available")]
    CheckoutUnavailable,

    /// The engine was torn down.
    #[error("cart session is closed")]
    Closed,

    /// A remote call failed while growing a reservation or placing an order.
    #[error("remote store error: {0}")]
    Remote(StoreError),
}

impl From<StoreError> for CartError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock {
                product_id,
                requested,
                available,
            } => Self::InsufficientStock {
                product_id,
                requested,
                available,
            },
            other => Self::Remote(other),
        }
    }
}

impl CartError {
    /// Reason published on the event channel for this error.
    #[must_use]
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::InsufficientStock {
                requested,
                available,
                ..
            } => FailureReason::InsufficientStock {
                requested: *requested,
                available: *available,
            },
            Self::OperationBusy(_) => FailureReason::Busy,
            Self::ItemNotFound(_) => FailureReason::NotFound,
            Self::EmptyCart => FailureReason::EmptyCart,
            Self::SignInRequired => FailureReason::SignInRequired,
            Self::CheckoutUnavailable | Self::Closed => FailureReason::Unavailable,
            Self::Remote(err) => FailureReason::Remote {
                message: err.to_string(),
            },
        }
    }

    /// Whether the caller should show a blocking message for this error.
    ///
    /// Busy rejections are expected during rapid clicks and are not shown.
    #[must_use]
    pub const fn is_user_visible(&self) -> bool {
        !matches!(self, Self::OperationBusy(_))
    }
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;
