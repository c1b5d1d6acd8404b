//! Status enums for stored documents.

use serde::{Deserialize, Serialize};

/// Lifecycle of an order placed from a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Whether the order can still change status.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Paid | Self::Shipped)
    }
}

/// Kind of a user-facing notification document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderPlaced,
    OrderStatusChanged,
}

/// Guest stock handling.
///
/// Anonymous sessions have no identity the stock counter can authorize, so a
/// store either keeps guest carts purely local or reserves through an
/// anonymous server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GuestStockPolicy {
    /// Guest carts never reserve or restore remote stock.
    #[default]
    LocalOnly,
    /// Guest carts reserve and restore remote stock like signed-in carts.
    ReserveRemote,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_open() {
        assert!(OrderStatus::Pending.is_open());
        assert!(OrderStatus::Shipped.is_open());
        assert!(!OrderStatus::Delivered.is_open());
        assert!(!OrderStatus::Cancelled.is_open());
    }

    #[test]
    fn test_guest_policy_serde() {
        let json = serde_json::to_string(&GuestStockPolicy::ReserveRemote).unwrap();
        assert_eq!(json, "\"reserve_remote\"");
        assert_eq!(GuestStockPolicy::default(), GuestStockPolicy::LocalOnly);
    }
}
