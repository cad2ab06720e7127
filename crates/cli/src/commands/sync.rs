//! Manual drift correction against the provider.
//!
//! # Usage
//!
//! ```bash
//! # Re-read one fulfillment order from the provider
//! podbridge-cli sync fo_01HXYZ
//!
//! # One pass of the periodic sync over records quiet for 2 hours
//! podbridge-cli sync-stale --older-than-secs 7200
//! ```
//!
//! # Environment Variables
//!
//! Same as the `podbridge` server: `DATABASE_URL`, `PODBRIDGE_BASE_URL`,
//! `PODBRIDGE_ENCRYPTION_KEY` and the optional `PROVIDER_*` settings.

use std::time::Duration;

use podbridge_core::FulfillmentOrderId;
use podbridge_fulfillment::config::{ConfigError, ServerConfig};
use podbridge_fulfillment::db;
use podbridge_fulfillment::error::AppError;
use podbridge_fulfillment::services::{Services, SyncReport, TransitionResult};
use podbridge_fulfillment::state::{StateError, build_services};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Service setup failed: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Sync(#[from] AppError),

    #[error("Failed to render result: {0}")]
    Render(#[from] serde_json::Error),
}

async fn connect() -> Result<(ServerConfig, Services), SyncError> {
    let config = ServerConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;
    let services = build_services(&config, &pool)?;
    Ok((config, services))
}

/// Sync one fulfillment order with the provider's current status.
///
/// # Errors
///
/// Returns an error if the record is unknown, has no provider order yet, or
/// the provider call fails.
pub async fn one(id: &str) -> Result<TransitionResult, SyncError> {
    let (_, services) = connect().await?;
    let id = FulfillmentOrderId::new(id);

    let result = services.machine.sync(&id).await?;
    tracing::info!(
        fulfillment_order_id = %id,
        result = %serde_json::to_string(&result)?,
        "Sync complete"
    );
    Ok(result)
}

/// Run one pass of the background sync.
///
/// `older_than_secs` overrides `SYNC_STALE_AFTER_SECS`.
///
/// # Errors
///
/// Returns an error if the stale records cannot be listed.
pub async fn stale(older_than_secs: Option<u64>) -> Result<SyncReport, SyncError> {
    let (config, services) = connect().await?;
    let stale_after = older_than_secs.map_or(config.sync.stale_after, Duration::from_secs);

    let report = services
        .sync
        .clone()
        .with_stale_after(stale_after)
        .run_once()
        .await?;

    tracing::info!(
        examined = report.examined,
        applied = report.applied,
        unchanged = report.unchanged,
        failed = report.failed,
        "Stale sync pass complete"
    );
    Ok(report)
}
