//! Session-local view of remaining stock.
//!
//! The catalog snapshot goes stale as soon as this session reserves a unit.
//! The ledger tracks what is left to offer without refetching the catalog:
//! it is seeded from a fresh catalog read minus what the cart already holds,
//! then moved by the delta of every successful cart mutation.
//!
//! Values never go below zero. Entries only exist for products seen in a
//! catalog read or touched by a cart mutation; everything else falls back to
//! the caller's catalog value in [`StockLedger::read`].

use std::collections::HashMap;

use cartkeeper_core::{CartLineItem, Product, ProductId};

/// Per-product remaining stock for the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockLedger {
    remaining: HashMap<ProductId, u32>,
}

impl StockLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite entries from a fresh catalog read.
    ///
    /// Each product's entry becomes its catalog stock minus the quantity of
    /// that product currently in `cart`, floored at zero. Entries for
    /// products absent from `catalog` are left as they are.
    pub fn seed(&mut self, catalog: &[Product], cart: &[CartLineItem]) {
        for product in catalog {
            let in_cart = cart
                .iter()
                .find(|item| item.product_id == product.id)
                .map_or(0, |item| item.quantity);
            self.remaining
                .insert(product.id.clone(), product.stock.saturating_sub(in_cart));
        }
    }

    /// Move an existing entry by `delta`, flooring at zero.
    ///
    /// Returns the new value, or `None` if the product has no entry.
    pub fn adjust(&mut self, id: &ProductId, delta: i64) -> Option<u32> {
        let value = self.remaining.get_mut(id)?;
        let next = (i64::from(*value) + delta).clamp(0, i64::from(u32::MAX));
        *value = u32::try_from(next).unwrap_or(u32::MAX);
        Some(*value)
    }

    /// Move an entry by `delta`, creating it from `base` first if missing.
    pub fn adjust_or_insert(&mut self, id: &ProductId, base: u32, delta: i64) -> u32 {
        if let Some(value) = self.adjust(id, delta) {
            return value;
        }
        self.remaining.insert(id.clone(), base);
        self.adjust(id, delta).unwrap_or(base)
    }

    /// Remaining stock for `id`, or `fallback` if the product has no entry.
    #[must_use]
    pub fn read(&self, id: &ProductId, fallback: u32) -> u32 {
        self.remaining.get(id).copied().unwrap_or(fallback)
    }

    /// Whether `id` has an entry.
    #[must_use]
    pub fn contains(&self, id: &ProductId) -> bool {
        self.remaining.contains_key(id)
    }

    /// Drop the entry for `id`.
    pub fn forget(&mut self, id: &ProductId) {
        self.remaining.remove(id);
    }

    /// Drop every entry. The next catalog read reseeds the ledger.
    pub fn reset(&mut self) {
        self.remaining.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }
}
