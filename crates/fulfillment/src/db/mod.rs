//! Persistence for the fulfillment integration.
//!
//! Every collaborator is consumed through an `async_trait` repository so the
//! services can run against `PostgreSQL` in production and the in-memory store
//! in tests.
//!
//! ## Tables
//!
//! - `fulfillment_credentials` - Per-store provider credentials (encrypted)
//! - `fulfillment_orders` - One row per order line submitted to the provider
//! - `fulfillment_webhook_events` - Inbound deliveries, unique by event id
//! - `orders`, `order_items`, `products`, `order_timeline` - Marketplace records
//! - `escrow_transactions`, `delivery_confirmations` - Payments ledger
//! - `settings` - Global settings (JSONB)
//!
//! # Migrations
//!
//! Migrations are stored in `crates/fulfillment/migrations/` and run via:
//! ```bash
//! cargo run -p podbridge-cli -- migrate
//! ```

pub mod credentials;
pub mod escrow;
pub mod fulfillment_orders;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod orders;
pub mod settings;
pub mod webhook_events;

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use credentials::{CredentialRepository, PgCredentialRepository};
pub use escrow::{EscrowLedger, PgEscrowLedger};
pub use fulfillment_orders::{FulfillmentRepository, PgFulfillmentRepository};
#[cfg(any(test, feature = "test-support"))]
pub use memory::InMemoryStore;
pub use orders::{OrderRepository, PgOrderRepository};
pub use settings::{PgSettingsRepository, SettingsRepository};
pub use webhook_events::{PgWebhookEventRepository, WebhookEventRepository};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., the active-line unique index).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Map a unique-violation into [`RepositoryError::Conflict`].
    pub(crate) fn from_unique_violation(err: sqlx::Error, message: &str) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Conflict(message.to_string())
            }
            _ => Self::Database(err),
        }
    }
}

/// The full set of repositories the services depend on.
#[derive(Clone)]
pub struct Repositories {
    pub credentials: Arc<dyn CredentialRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub fulfillment: Arc<dyn FulfillmentRepository>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
    pub settings: Arc<dyn SettingsRepository>,
    pub escrow: Arc<dyn EscrowLedger>,
}

impl Repositories {
    /// `PostgreSQL`-backed repositories sharing one pool.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            credentials: Arc::new(PgCredentialRepository::new(pool.clone())),
            orders: Arc::new(PgOrderRepository::new(pool.clone())),
            fulfillment: Arc::new(PgFulfillmentRepository::new(pool.clone())),
            webhook_events: Arc::new(PgWebhookEventRepository::new(pool.clone())),
            settings: Arc::new(PgSettingsRepository::new(pool.clone())),
            escrow: Arc::new(PgEscrowLedger::new(pool.clone())),
        }
    }

    /// Repositories backed by one shared in-memory store.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn in_memory(store: &Arc<InMemoryStore>) -> Self {
        Self {
            credentials: store.clone(),
            orders: store.clone(),
            fulfillment: store.clone(),
            webhook_events: store.clone(),
            settings: store.clone(),
            escrow: store.clone(),
        }
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Run the embedded migrations.
///
/// # Errors
///
/// Returns `MigrateError` if a migration fails to apply.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
