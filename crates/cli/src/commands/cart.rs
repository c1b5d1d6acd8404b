//! Cart commands.
//!
//! Each command opens a session for the chosen identity (`--user` or guest),
//! applies one operation and prints the resulting cart.

use std::io::Write;

use cartkeeper_core::ProductId;
use cartkeeper_engine::CartEngine;

use super::{CommandError, Session};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Print the cart lines and totals.
///
/// # Errors
///
/// Returns an error if writing to stdout fails.
pub fn show(session: &Session) -> CommandResult {
    print_cart(&session.engine)
}

/// Add one unit of `id`.
///
/// # Errors
///
/// Returns an error if the product is unknown or the engine rejects the add.
pub async fn add(session: &Session, id: &ProductId) -> CommandResult {
    let product = session
        .engine
        .catalog()
        .product(id)
        .await?
        .ok_or_else(|| CommandError::UnknownProduct(id.to_string()))?;

    session.engine.add_item(&product).await?;
    print_cart(&session.engine)
}

/// Remove the line for `id`.
///
/// # Errors
///
/// Returns an error if the engine rejects the removal.
pub async fn remove(session: &Session, id: &ProductId) -> CommandResult {
    session.engine.remove_item(id).await?;
    print_cart(&session.engine)
}

/// Set the quantity for `id`.
///
/// # Errors
///
/// Returns an error if the engine rejects the change.
pub async fn set(session: &Session, id: &ProductId, quantity: u32) -> CommandResult {
    session.engine.set_quantity(id, quantity).await?;
    print_cart(&session.engine)
}

/// Empty the cart.
///
/// # Errors
///
/// Returns an error if the session is closed.
pub async fn clear(session: &Session) -> CommandResult {
    session.engine.clear_cart().await?;
    print_cart(&session.engine)
}

/// Place an order for the cart.
///
/// # Errors
///
/// Returns an error if the session is a guest, the cart is empty, or the
/// order cannot be written.
pub async fn checkout(session: &Session) -> CommandResult {
    let order = session.engine.checkout().await?;

    let mut out = std::io::stdout().lock();
    writeln!(
        out,
        "Order {} placed: {} items, total {}",
        order.id,
        order.item_count(),
        order.total
    )?;
    Ok(())
}

fn print_cart(engine: &CartEngine) -> CommandResult {
    let items = engine.items();
    let mut out = std::io::stdout().lock();

    if items.is_empty() {
        writeln!(out, "Cart is empty")?;
        return Ok(());
    }

    for item in &items {
        writeln!(
            out,
            "{:<24} {:<32} {:>4} x {:>10} = {:>10}",
            item.product_id,
            item.name,
            item.quantity,
            item.unit_price.to_string(),
            item.line_total().to_string()
        )?;
    }
    writeln!(
        out,
        "{} items, total {}",
        engine.total_items(),
        engine.total_price()
    )?;
    Ok(())
}
