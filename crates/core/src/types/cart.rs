//! Cart line items and the two stored forms of a cart.
//!
//! - [`CartDocument`] - one per authenticated user in the remote store
//! - [`CartSnapshot`] - the local cache entry, used for guests and mirrored
//!   for signed-in users

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ProductId, UserId};
use super::price::Price;
use super::product::Product;

/// Current schema version written by this crate.
pub const CART_SCHEMA_VERSION: u32 = 2;

/// One product entry in a cart.
///
/// Display fields are copied from the catalog when the line is created and
/// are not refreshed if the product changes later, so the cart keeps the
/// price the shopper saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub name: String,
    pub unit_price: Price,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Always at least 1 for a line held in a cart.
    pub quantity: u32,
}

impl CartLineItem {
    /// Create a line from a catalog product.
    #[must_use]
    pub fn from_product(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.id.clone(),
            name: product.name.clone(),
            unit_price: product.price,
            image: product.image.clone(),
            category: product.category.clone(),
            quantity,
        }
    }

    /// Unit price times quantity.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price.times(self.quantity)
    }
}

/// Drop empty lines and merge duplicate product ids.
///
/// Duplicates keep the position and snapshot fields of their first
/// occurrence; quantities are summed.
#[must_use]
pub fn normalize_items(items: Vec<CartLineItem>) -> Vec<CartLineItem> {
    let mut out: Vec<CartLineItem> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity == 0 {
            continue;
        }
        if let Some(existing) = out.iter_mut().find(|i| i.product_id == item.product_id) {
            existing.quantity = existing.quantity.saturating_add(item.quantity);
        } else {
            out.push(item);
        }
    }
    out
}

/// Cart document stored remotely for an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartDocument {
    /// Documents written before versioning carry no field and read as 1.
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub items: Vec<CartLineItem>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

const fn legacy_schema_version() -> u32 {
    1
}

impl CartDocument {
    /// Build a current-version document for a user.
    #[must_use]
    pub fn new(user_id: UserId, items: Vec<CartLineItem>) -> Self {
        Self {
            schema_version: CART_SCHEMA_VERSION,
            user_id: Some(user_id),
            items,
            updated_at: Some(Utc::now()),
        }
    }

    /// Items after dropping empty lines and merging duplicates.
    #[must_use]
    pub fn into_items(self) -> Vec<CartLineItem> {
        normalize_items(self.items)
    }
}

/// Local cache entry holding the last cart state.
///
/// `user_id` is `None` for a guest cart and the owner's id for the mirror of
/// an authenticated cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    #[serde(default = "legacy_schema_version")]
    pub version: u32,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub items: Vec<CartLineItem>,
    pub saved_at: DateTime<Utc>,
}

impl CartSnapshot {
    /// Snapshot of the given items, stamped now.
    #[must_use]
    pub fn new(user_id: Option<UserId>, items: Vec<CartLineItem>) -> Self {
        Self {
            version: CART_SCHEMA_VERSION,
            user_id,
            items,
            saved_at: Utc::now(),
        }
    }

    /// Whether this snapshot was written by a guest session.
    #[must_use]
    pub const fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }

    /// Items after dropping empty lines and merging duplicates.
    #[must_use]
    pub fn into_items(self) -> Vec<CartLineItem> {
        normalize_items(self.items)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::types::price::CurrencyCode;

    fn line(id: &str, qty: u32) -> CartLineItem {
        CartLineItem {
            product_id: ProductId::new(id),
            name: id.to_uppercase(),
            unit_price: Price::new(Decimal::from(10), CurrencyCode::USD),
            image: None,
            category: None,
            quantity: qty,
        }
    }

    #[test]
    fn test_normalize_drops_zero_quantity() {
        let items = normalize_items(vec![line("a", 0), line("b", 2)]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id.as_str(), "b");
    }

    #[test]
    fn test_normalize_merges_duplicates_in_place() {
        let items = normalize_items(vec![line("a", 1), line("b", 1), line("a", 3)]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].product_id.as_str(), "a");
        assert_eq!(items[0].quantity, 4);
        assert_eq!(items[1].product_id.as_str(), "b");
    }

    #[test]
    fn test_legacy_document_reads_as_version_one() {
        let json = r#"{"items":[{"productId":"a","unitPrice":{"amount":"3"},"quantity":2}]}"#;
        let doc: CartDocument = serde_json::from_str(json).unwrap();

        assert_eq!(doc.schema_version, 1);
        assert!(doc.user_id.is_none());
        let items = doc.into_items();
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[0].name, "");
    }

    #[test]
    fn test_snapshot_without_owner_is_guest() {
        let json = r#"{"version":2,"items":[],"savedAt":"2024-05-01T10:00:00Z"}"#;
        let snapshot: CartSnapshot = serde_json::from_str(json).unwrap();
        assert!(snapshot.is_guest());

        let owned = CartSnapshot::new(Some(UserId::new("u1")), vec![line("a", 1)]);
        assert!(!owned.is_guest());
    }

    #[test]
    fn test_line_total() {
        assert_eq!(line("a", 3).line_total().amount, Decimal::from(30));
    }
}
