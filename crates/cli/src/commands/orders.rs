//! Order history command.

use std::io::Write;
use std::path::Path;

use cartkeeper_core::UserId;
use cartkeeper_engine::store::file::FileOrderStore;

use super::CommandError;

/// Print the orders placed by `user`, oldest first.
///
/// # Errors
///
/// Returns an error if no user is given or the orders cannot be read.
pub async fn list(dir: &Path, user: Option<UserId>) -> Result<(), Box<dyn std::error::Error>> {
    let user = user.ok_or(CommandError::UserRequired)?;
    let orders = FileOrderStore::new(dir).orders_for(&user).await?;

    let mut out = std::io::stdout().lock();
    if orders.is_empty() {
        writeln!(out, "No orders for {user}")?;
    }
    for order in &orders {
        writeln!(
            out,
            "{}  {}  {:?}  {} items  {}",
            order.created_at.format("%Y-%m-%d %H:%M"),
            order.id,
            order.status,
            order.item_count(),
            order.total
        )?;
    }
    Ok(())
}
