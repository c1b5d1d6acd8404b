//! Checkout: turn the current cart into a pending order.
//!
//! The reserved stock is consumed by the order, so checkout never restores
//! stock. Ordered lines leave the cart; lines added for other products while
//! the order was being written stay.

use cartkeeper_core::{Notification, Order, ProductId};
use tracing::{info, instrument, warn};

use crate::engine::CartEngine;
use crate::error::{CartError, Result};
use crate::events::{CartEvent, CartOperation, PersistenceTarget};

impl CartEngine {
    /// Place an order for every line in the cart.
    ///
    /// Holds the operation guard for every line's product for the duration.
    ///
    /// # Errors
    ///
    /// - `SignInRequired` for a guest session
    /// - `CheckoutUnavailable` if no order store was configured
    /// - `EmptyCart` if there is nothing to order
    /// - `OperationBusy` if any line has an operation in flight
    /// - `Remote` if the order cannot be written; the cart is unchanged
    #[instrument(skip(self))]
    pub async fn checkout(&self) -> Result<Order> {
        let result = self.try_checkout().await;
        self.report(CartOperation::Checkout, None, &result);
        result
    }

    async fn try_checkout(&self) -> Result<Order> {
        self.ensure_open()?;
        let user = self.current_user().ok_or(CartError::SignInRequired)?;
        let orders = self
            .inner()
            .orders
            .clone()
            .ok_or(CartError::CheckoutUnavailable)?;

        let ids: Vec<ProductId> = self
            .items()
            .into_iter()
            .map(|item| item.product_id)
            .collect();
        if ids.is_empty() {
            return Err(CartError::EmptyCart);
        }
        let _permit = self
            .inner()
            .guard
            .try_acquire_all(&ids)
            .map_err(CartError::OperationBusy)?;

        // Only lines held by the permit are ordered
        let lines: Vec<_> = self
            .items()
            .into_iter()
            .filter(|item| ids.contains(&item.product_id))
            .collect();
        if lines.is_empty() {
            return Err(CartError::EmptyCart);
        }

        let order = Order::from_cart(user.clone(), lines, self.inner().config.currency);
        orders
            .create_order(&order)
            .await
            .map_err(CartError::Remote)?;

        let notification = Notification::order_placed(&order);
        if let Err(e) = orders.create_notification(&notification).await {
            warn!(order_id = %order.id, error = %e, "Failed to create order notification");
            self.inner().events.emit(CartEvent::PersistenceWarning {
                target: PersistenceTarget::Notification,
                message: e.to_string(),
            });
        }

        let ordered: Vec<ProductId> = order
            .items
            .iter()
            .map(|item| item.product_id.clone())
            .collect();
        self.take_lines(&ordered);
        let remaining = self.items();
        if remaining.is_empty() {
            self.inner().persistence.clear(Some(&user)).await;
        } else {
            self.inner()
                .persistence
                .persist(Some(&user), &remaining)
                .await;
        }

        info!(
            order_id = %order.id,
            user_id = %user,
            items = order.item_count(),
            total = %order.total,
            "Order placed"
        );
        Ok(order)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use cartkeeper_core::{CurrencyCode, OrderStatus, Price, Product, UserId};
    use rust_decimal::Decimal;

    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Collaborators;
    use crate::identity::IdentityService;
    use crate::store::memory::{
        Fault, InMemoryCartStore, InMemoryCatalog, InMemoryLocalCache, InMemoryOrderStore,
    };

    fn product(id: &str, price: i64) -> Product {
        Product {
            id: ProductId::new(id),
            name: id.to_uppercase(),
            price: Price::new(Decimal::from(price), CurrencyCode::USD),
            previous_price: None,
            image: None,
            category: None,
            stock: 10,
        }
    }

    struct Harness {
        catalog: Arc<InMemoryCatalog>,
        carts: Arc<InMemoryCartStore>,
        orders: Arc<InMemoryOrderStore>,
        engine: CartEngine,
    }

    fn harness(user: Option<&str>, with_orders: bool) -> Harness {
        let catalog = Arc::new(InMemoryCatalog::new([product("a", 1000), product("b", 2500)]));
        let carts = Arc::new(InMemoryCartStore::new());
        let orders = Arc::new(InMemoryOrderStore::new());
        let identity = Arc::new(user.map_or_else(IdentityService::new, |u| {
            IdentityService::signed_in(UserId::new(u))
        }));
        let engine = CartEngine::new(
            EngineConfig::default(),
            Collaborators {
                catalog: catalog.clone(),
                carts: carts.clone(),
                local: Arc::new(InMemoryLocalCache::new()),
                identity,
                orders: with_orders.then(|| orders.clone() as Arc<dyn crate::store::OrderStore>),
            },
        );
        Harness {
            catalog,
            carts,
            orders,
            engine,
        }
    }

    #[tokio::test]
    async fn test_checkout_places_order_and_empties_cart() {
        let h = harness(Some("u1"), true);
        h.engine.init().await;
        h.engine.add_item(&product("a", 1000)).await.unwrap();
        h.engine.add_item(&product("a", 1000)).await.unwrap();
        h.engine.add_item(&product("b", 2500)).await.unwrap();

        let order = h.engine.checkout().await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total.amount, Decimal::from(4500));
        assert_eq!(order.item_count(), 3);

        assert!(h.engine.items().is_empty());
        assert!(h.carts.document(&UserId::new("u1")).is_none());
        assert_eq!(h.orders.orders().len(), 1);
        assert_eq!(h.orders.notifications().len(), 1);

        // Reserved stock stays consumed
        assert_eq!(h.catalog.stock(&ProductId::new("a")), Some(8));
        assert_eq!(h.catalog.restore_calls(), 0);
    }

    #[tokio::test]
    async fn test_checkout_requires_sign_in() {
        let h = harness(None, true);
        h.engine.add_item(&product("a", 1000)).await.unwrap();

        let err = h.engine.checkout().await.unwrap_err();
        assert!(matches!(err, CartError::SignInRequired));
        assert_eq!(h.engine.total_items(), 1);
    }

    #[tokio::test]
    async fn test_checkout_empty_cart() {
        let h = harness(Some("u1"), true);
        assert!(matches!(
            h.engine.checkout().await,
            Err(CartError::EmptyCart)
        ));
    }

    #[tokio::test]
    async fn test_checkout_without_order_store() {
        let h = harness(Some("u1"), false);
        h.engine.add_item(&product("a", 1000)).await.unwrap();
        assert!(matches!(
            h.engine.checkout().await,
            Err(CartError::CheckoutUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_order_failure_keeps_cart() {
        let h = harness(Some("u1"), true);
        h.engine.add_item(&product("a", 1000)).await.unwrap();
        h.orders.fail_orders(Some(Fault::Unavailable));

        let err = h.engine.checkout().await.unwrap_err();
        assert!(matches!(err, CartError::Remote(_)));
        assert_eq!(h.engine.total_items(), 1);
        assert!(h.orders.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_notification_failure_is_warning() {
        let h = harness(Some("u1"), true);
        h.engine.add_item(&product("a", 1000)).await.unwrap();
        h.orders.fail_notifications(Some(Fault::Unavailable));
        let mut rx = h.engine.subscribe();

        h.engine.checkout().await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            CartEvent::PersistenceWarning {
                target: PersistenceTarget::Notification,
                ..
            }
        ));
        assert!(h.engine.items().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_busy_when_line_locked() {
        let h = harness(Some("u1"), true);
        h.engine.add_item(&product("a", 1000)).await.unwrap();

        let _held = h.engine.inner().guard.try_acquire(&ProductId::new("a")).unwrap();
        assert!(matches!(
            h.engine.checkout().await,
            Err(CartError::OperationBusy(_))
        ));
        assert_eq!(h.orders.orders().len(), 0);
    }
}
