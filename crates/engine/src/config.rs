//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `CARTKEEPER_GUEST_STOCK_POLICY` - `local_only` or `reserve_remote` (default: `local_only`)
//! - `CARTKEEPER_CURRENCY` - ISO 4217 store currency (default: USD)
//! - `CARTKEEPER_CATALOG_CACHE_TTL_SECS` - Catalog cache lifetime (default: 300)
//! - `CARTKEEPER_CATALOG_CACHE_CAPACITY` - Max cached products (default: 1000)
//! - `CARTKEEPER_EVENT_BUFFER` - Events buffered per subscriber (default: 64)

use std::time::Duration;

use cartkeeper_core::{CurrencyCode, GuestStockPolicy};
use thiserror::Error;

const DEFAULT_CATALOG_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CATALOG_CACHE_CAPACITY: u64 = 1000;
const DEFAULT_EVENT_BUFFER: usize = 64;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How guest carts treat the remote stock counter
    pub guest_stock_policy: GuestStockPolicy,
    /// Currency applied to catalog prices and order totals
    pub currency: CurrencyCode,
    /// How long a catalog read may be served from cache after a failed refresh
    pub catalog_cache_ttl: Duration,
    /// Maximum number of products kept in the catalog cache
    pub catalog_cache_capacity: u64,
    /// Events buffered for each subscriber before old ones are dropped
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            guest_stock_policy: GuestStockPolicy::default(),
            currency: CurrencyCode::default(),
            catalog_cache_ttl: Duration::from_secs(DEFAULT_CATALOG_CACHE_TTL_SECS),
            catalog_cache_capacity: DEFAULT_CATALOG_CACHE_CAPACITY,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let guest_stock_policy = match lookup("CARTKEEPER_GUEST_STOCK_POLICY") {
            Some(value) => parse_guest_policy(&value)?,
            None => defaults.guest_stock_policy,
        };
        let currency = match lookup("CARTKEEPER_CURRENCY") {
            Some(value) => value.parse::<CurrencyCode>().map_err(|e| {
                ConfigError::InvalidEnvVar("CARTKEEPER_CURRENCY".to_string(), e.to_string())
            })?,
            None => defaults.currency,
        };
        let catalog_cache_ttl = parse_or(
            &lookup,
            "CARTKEEPER_CATALOG_CACHE_TTL_SECS",
            DEFAULT_CATALOG_CACHE_TTL_SECS,
        )
        .map(Duration::from_secs)?;
        let catalog_cache_capacity = parse_or(
            &lookup,
            "CARTKEEPER_CATALOG_CACHE_CAPACITY",
            DEFAULT_CATALOG_CACHE_CAPACITY,
        )?;
        let event_buffer = parse_or(&lookup, "CARTKEEPER_EVENT_BUFFER", DEFAULT_EVENT_BUFFER)?;
        if event_buffer == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "CARTKEEPER_EVENT_BUFFER".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            guest_stock_policy,
            currency,
            catalog_cache_ttl,
            catalog_cache_capacity,
            event_buffer,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse a guest stock policy name.
fn parse_guest_policy(value: &str) -> Result<GuestStockPolicy, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "local_only" | "local-only" => Ok(GuestStockPolicy::LocalOnly),
        "reserve_remote" | "reserve-remote" => Ok(GuestStockPolicy::ReserveRemote),
        other => Err(ConfigError::InvalidEnvVar(
            "CARTKEEPER_GUEST_STOCK_POLICY".to_string(),
            format!("expected local_only or reserve_remote, got '{other}'"),
        )),
    }
}

/// Parse a variable with a default value.
fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key).map_or(Ok(default), |value| {
        value
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}
