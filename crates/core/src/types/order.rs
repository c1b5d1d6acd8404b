//! Order and notification documents.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cart::CartLineItem;
use super::id::UserId;
use super::price::{CurrencyCode, Price};
use super::status::{NotificationKind, OrderStatus};

/// An order placed from a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: UserId,
    pub items: Vec<CartLineItem>,
    pub total: Price,
    #[serde(default)]
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Build a pending order from cart lines.
    #[must_use]
    pub fn from_cart(user_id: UserId, items: Vec<CartLineItem>, currency_code: CurrencyCode) -> Self {
        let amount = items
            .iter()
            .map(|item| item.line_total().amount)
            .fold(Decimal::ZERO, |acc, amount| acc + amount);

        Self {
            id: Uuid::new_v4(),
            user_id,
            items,
            total: Price::new(amount, currency_code),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items
            .iter()
            .fold(0u32, |acc, item| acc.saturating_add(item.quantity))
    }
}

/// A message shown in the user's notification list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default)]
    pub order_id: Option<Uuid>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Notification announcing a newly placed order.
    #[must_use]
    pub fn order_placed(order: &Order) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: order.user_id.clone(),
            kind: NotificationKind::OrderPlaced,
            message: format!(
                "Order {} placed: {} item(s), total {}",
                order.id,
                order.item_count(),
                order.total
            ),
            order_id: Some(order.id),
            read: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::id::ProductId;

    fn line(id: &str, price: i64, qty: u32) -> CartLineItem {
        CartLineItem {
            product_id: ProductId::new(id),
            name: id.to_string(),
            unit_price: Price::new(Decimal::from(price), CurrencyCode::USD),
            image: None,
            category: None,
            quantity: qty,
        }
    }

    #[test]
    fn test_order_total_and_count() {
        let order = Order::from_cart(
            UserId::new("u1"),
            vec![line("a", 1000, 2), line("b", 2500, 1)],
            CurrencyCode::USD,
        );

        assert_eq!(order.total.amount, Decimal::from(4500));
        assert_eq!(order.item_count(), 3);
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn test_order_placed_notification() {
        let order = Order::from_cart(UserId::new("u1"), vec![line("a", 5, 1)], CurrencyCode::USD);
        let notification = Notification::order_placed(&order);

        assert_eq!(notification.kind, NotificationKind::OrderPlaced);
        assert_eq!(notification.order_id, Some(order.id));
        assert_eq!(notification.user_id, order.user_id);
        assert!(!notification.read);
        assert!(notification.message.contains("$5.00"));
    }
}
