//! Cartkeeper CLI - drive the cart engine against local JSON data.
//!
//! # Usage
//!
//! ```bash
//! # Import products into the local catalog
//! ck-cli catalog seed products.json
//!
//! # Show products and remaining stock
//! ck-cli catalog list
//!
//! # Guest cart (local snapshot only)
//! ck-cli cart add tee-black
//! ck-cli cart show
//!
//! # Signed-in cart
//! ck-cli --user alice cart set tee-black 3
//! ck-cli --user alice cart checkout
//! ck-cli --user alice orders
//! ```
//!
//! # Environment Variables
//!
//! - `CARTKEEPER_DATA_DIR` - Data directory (default: `.cartkeeper`)
//! - `CARTKEEPER_LOG_FORMAT` - `json` for JSON log lines
//! - `RUST_LOG` - Log filter (default: `cartkeeper_engine=info`)
//!
//! Engine settings (`CARTKEEPER_GUEST_STOCK_POLICY`, `CARTKEEPER_CURRENCY`, ...)
//! are read by `EngineConfig::from_env`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use cartkeeper_core::{ProductId, UserId};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

const DEFAULT_DATA_DIR: &str = ".cartkeeper";

#[derive(Parser)]
#[command(name = "ck-cli")]
#[command(author, version, about = "Cartkeeper cart tools")]
struct Cli {
    /// Data directory (defaults to `CARTKEEPER_DATA_DIR` or `.cartkeeper`)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Act as this signed-in user instead of a guest
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the product catalog
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
    /// Inspect and change the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// List orders placed by the signed-in user
    Orders,
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Replace the catalog with products from a JSON file
    Seed {
        /// Path to a JSON array of product documents
        file: PathBuf,
    },
    /// List products with remaining stock
    List,
}

#[derive(Subcommand)]
enum CartAction {
    /// Show cart lines and totals
    Show,
    /// Add one unit of a product
    Add { product_id: String },
    /// Remove a product's line
    Remove { product_id: String },
    /// Set a line's quantity (0 removes it)
    Set { product_id: String, quantity: u32 },
    /// Empty the cart and release its stock
    Clear,
    /// Place an order for the cart
    Checkout,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

/// Initialize logging with an `EnvFilter` and plain or JSON output.
fn init_tracing() {
    dotenvy::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cartkeeper_engine=info,cartkeeper_cli=info".into());
    let json = std::env::var("CARTKEEPER_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn data_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os("CARTKEEPER_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let dir = data_dir(cli.data_dir);
    let user = cli.user.map(UserId::new);

    match cli.command {
        Commands::Catalog { action } => match action {
            CatalogAction::Seed { file } => commands::catalog::seed(&dir, &file).await?,
            CatalogAction::List => commands::catalog::list(&dir, user).await?,
        },
        Commands::Cart { action } => {
            let session = commands::Session::open(&dir, user).await?;
            let result = match action {
                CartAction::Show => commands::cart::show(&session),
                CartAction::Add { product_id } => {
                    commands::cart::add(&session, &ProductId::new(product_id)).await
                }
                CartAction::Remove { product_id } => {
                    commands::cart::remove(&session, &ProductId::new(product_id)).await
                }
                CartAction::Set {
                    product_id,
                    quantity,
                } => commands::cart::set(&session, &ProductId::new(product_id), quantity).await,
                CartAction::Clear => commands::cart::clear(&session).await,
                CartAction::Checkout => commands::cart::checkout(&session).await,
            };
            session.close();
            result?;
        }
        Commands::Orders => commands::orders::list(&dir, user).await?,
    }
    Ok(())
}
