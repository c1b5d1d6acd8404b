//! Product documents.
//!
//! [`ProductDocument`] is the shape stored in the remote document database.
//! Fields were added to the collection over time, so every field except the
//! id is optional on the wire. [`Product`] is what the rest of the code sees:
//! required fields, stock clamped to a non-negative count, and the store
//! currency applied to bare amounts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::ProductId;
use super::price::{CurrencyCode, Price};

/// Errors raised while converting a stored document into its strict form.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// The document has no usable id.
    #[error("{kind} document is missing an id")]
    MissingId {
        /// Document kind (e.g., "product").
        kind: &'static str,
    },
}

/// A catalog product with all display fields resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Price,
    /// Compare-at price shown struck through on sale items.
    pub previous_price: Option<Price>,
    pub image: Option<String>,
    pub category: Option<String>,
    /// Units available according to the last catalog read.
    pub stock: u32,
}

impl Product {
    /// Whether at least one unit is listed in the catalog.
    #[must_use]
    pub const fn in_stock(&self) -> bool {
        self.stock > 0
    }
}

/// Lenient wire form of a product document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub previous_price: Option<Decimal>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Stored as a signed integer; manual edits have left negative values.
    #[serde(default)]
    pub stock: Option<i64>,
}

impl ProductDocument {
    /// Apply defaults and produce a strict [`Product`].
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::MissingId`] when the id is absent or blank.
    pub fn into_product(self, currency_code: CurrencyCode) -> Result<Product, DocumentError> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or(DocumentError::MissingId { kind: "product" })?;

        let stock = self
            .stock
            .unwrap_or(0)
            .clamp(0, i64::from(u32::MAX));

        Ok(Product {
            id: ProductId::new(id),
            name: self.name.unwrap_or_default(),
            price: Price::new(self.price.unwrap_or(Decimal::ZERO), currency_code),
            previous_price: self
                .previous_price
                .filter(|p| *p > Decimal::ZERO)
                .map(|p| Price::new(p, currency_code)),
            image: self.image.filter(|s| !s.is_empty()),
            category: self.category.filter(|s| !s.is_empty()),
            stock: u32::try_from(stock).unwrap_or(u32::MAX),
        })
    }
}

impl From<&Product> for ProductDocument {
    fn from(product: &Product) -> Self {
        Self {
            id: Some(product.id.to_string()),
            name: Some(product.name.clone()),
            price: Some(product.price.amount),
            previous_price: product.previous_price.map(|p| p.amount),
            image: product.image.clone(),
            category: product.category.clone(),
            stock: Some(i64::from(product.stock)),
        }
    }
}
