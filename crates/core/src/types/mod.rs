//! Core types for Cartkeeper.
//!
//! This module provides type-safe wrappers and document schemas for the
//! storefront domain.

pub mod cart;
pub mod id;
pub mod order;
pub mod price;
pub mod product;
pub mod status;

pub use cart::{CART_SCHEMA_VERSION, CartDocument, CartLineItem, CartSnapshot, normalize_items};
pub use id::*;
pub use order::{Notification, Order};
pub use price::{CurrencyCode, Price, UnknownCurrency};
pub use product::{DocumentError, Product, ProductDocument};
pub use status::*;
