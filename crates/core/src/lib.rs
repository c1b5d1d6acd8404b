//! Cartkeeper Core - Shared types library.
//!
//! This crate provides the types used across all Cartkeeper components:
//! - `engine` - Cart and stock reservation engine
//! - `cli` - Command-line tools for driving the engine against local data
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no network access, no
//! storage. Documents read from the remote store pass through the lenient
//! wire forms in [`types::product`] and [`types::cart`], which apply defaults
//! once at the read boundary so the rest of the code works with required
//! fields only.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, prices, product/cart/order documents, statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
