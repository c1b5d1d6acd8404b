//! Catalog commands.
//!
//! # Usage
//!
//! ```bash
//! ck-cli catalog seed products.json
//! ck-cli catalog list
//! ```
//!
//! The seed file is a JSON array of product documents:
//!
//! ```json
//! [{ "id": "tee-black", "name": "Black Tee", "price": "25.00", "stock": 10 }]
//! ```

use std::io::Write;
use std::path::Path;

use cartkeeper_core::{Product, ProductDocument, UserId};
use cartkeeper_engine::EngineConfig;
use cartkeeper_engine::store::file::FileCatalog;
use tracing::info;

use super::Session;

/// Replace the catalog with the products in `file`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, a document has no
/// id, or the catalog cannot be written.
pub async fn seed(dir: &Path, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::from_env()?;

    let raw = tokio::fs::read(file).await?;
    let documents: Vec<ProductDocument> = serde_json::from_slice(&raw)?;
    let products = documents
        .into_iter()
        .map(|doc| doc.into_product(config.currency))
        .collect::<Result<Vec<Product>, _>>()?;

    FileCatalog::new(dir, config.currency)
        .import(&products)
        .await?;

    info!(count = products.len(), data_dir = %dir.display(), "Catalog seeded");
    Ok(())
}

/// Print every product with the stock left to offer this session.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read or output fails.
pub async fn list(dir: &Path, user: Option<UserId>) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::open(dir, user).await?;
    let products = session.engine.sync_catalog().await;

    let result = products.map_err(Into::into).and_then(|products| {
        let mut out = std::io::stdout().lock();
        if products.is_empty() {
            writeln!(out, "Catalog is empty")?;
        }
        for product in &products {
            let remaining = session.engine.updated_stock(&product.id, product.stock);
            let price = product.price.to_string();
            let was = product
                .previous_price
                .map(|p| format!(" (was {p})"))
                .unwrap_or_default();
            writeln!(
                out,
                "{:<24} {:<32} {:>10}{was}  {remaining} left",
                product.id, product.name, price
            )?;
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    });

    session.close();
    result
}
