//! Webhook event repository.
//!
//! The unique `event_id` is the idempotency key for provider deliveries.
//! [`WebhookEventRepository::claim`] takes ownership of an event atomically, so
//! concurrent redeliveries of the same id cannot both apply side effects.

use std::time::Duration;

use async_trait::async_trait;
use podbridge_core::{FulfillmentOrderId, ProviderEventId, WebhookEventStatus};
use sqlx::PgPool;
use sqlx::types::Json;

use super::RepositoryError;
use crate::models::{ClaimOutcome, NewWebhookEvent, WebhookEvent};

/// Persistence for inbound webhook events.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Atomically claim an event for processing.
    ///
    /// A new id is inserted as `PROCESSING`. An existing `FAILED` event, or a
    /// `PROCESSING` event whose lease is older than `lease`, is re-claimed.
    async fn claim(
        &self,
        event: &NewWebhookEvent,
        lease: Duration,
    ) -> Result<ClaimOutcome, RepositoryError>;

    /// Link the event to the fulfillment order it concerns.
    async fn attach_fulfillment_order(
        &self,
        event_id: &ProviderEventId,
        fulfillment_order_id: &FulfillmentOrderId,
    ) -> Result<(), RepositoryError>;

    async fn mark_processed(&self, event_id: &ProviderEventId) -> Result<(), RepositoryError>;

    async fn mark_failed(
        &self,
        event_id: &ProviderEventId,
        error: &str,
    ) -> Result<(), RepositoryError>;

    async fn get(
        &self,
        event_id: &ProviderEventId,
    ) -> Result<Option<WebhookEvent>, RepositoryError>;

    /// Most recent events for a fulfillment order, newest first.
    async fn list_for_fulfillment_order(
        &self,
        fulfillment_order_id: &FulfillmentOrderId,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, RepositoryError>;
}

const EVENT_COLUMNS: &str = r"
    event_id, event_type, fulfillment_order_id, payload, status,
    error_message, processed_at, created_at, updated_at
";

/// `PostgreSQL` implementation of [`WebhookEventRepository`].
pub struct PgWebhookEventRepository {
    pool: PgPool,
}

impl PgWebhookEventRepository {
    /// Create a new webhook event repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventRepository for PgWebhookEventRepository {
    async fn claim(
        &self,
        event: &NewWebhookEvent,
        lease: Duration,
    ) -> Result<ClaimOutcome, RepositoryError> {
        let lease_secs = lease.as_secs_f64();

        let claimed: Option<ProviderEventId> = sqlx::query_scalar(
            r"
            INSERT INTO fulfillment_webhook_events (event_id, event_type, payload, status)
            VALUES ($1, $2, $3, 'PROCESSING')
            ON CONFLICT (event_id) DO UPDATE SET
                status = 'PROCESSING',
                event_type = EXCLUDED.event_type,
                payload = EXCLUDED.payload,
                error_message = NULL,
                updated_at = NOW()
            WHERE fulfillment_webhook_events.status = 'FAILED'
               OR (fulfillment_webhook_events.status = 'PROCESSING'
                   AND fulfillment_webhook_events.updated_at < NOW() - make_interval(secs => $4))
            RETURNING event_id
            ",
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(Json(&event.payload))
        .bind(lease_secs)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(ClaimOutcome::Claimed);
        }

        let status: Option<WebhookEventStatus> =
            sqlx::query_scalar("SELECT status FROM fulfillment_webhook_events WHERE event_id = $1")
                .bind(&event.event_id)
                .fetch_optional(&self.pool)
                .await?;

        match status {
            Some(WebhookEventStatus::Processed) => Ok(ClaimOutcome::AlreadyProcessed),
            // A FAILED or missing row here means another claim raced this one.
            Some(WebhookEventStatus::Processing | WebhookEventStatus::Failed) | None => {
                Ok(ClaimOutcome::InProgress)
            }
        }
    }

    async fn attach_fulfillment_order(
        &self,
        event_id: &ProviderEventId,
        fulfillment_order_id: &FulfillmentOrderId,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE fulfillment_webhook_events
            SET fulfillment_order_id = $2, updated_at = NOW()
            WHERE event_id = $1
            ",
        )
        .bind(event_id)
        .bind(fulfillment_order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_processed(&self, event_id: &ProviderEventId) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE fulfillment_webhook_events
            SET status = 'PROCESSED', processed_at = NOW(), error_message = NULL, updated_at = NOW()
            WHERE event_id = $1
            ",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        event_id: &ProviderEventId,
        error: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE fulfillment_webhook_events
            SET status = 'FAILED', error_message = $2, updated_at = NOW()
            WHERE event_id = $1
            ",
        )
        .bind(event_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        event_id: &ProviderEventId,
    ) -> Result<Option<WebhookEvent>, RepositoryError> {
        let row = sqlx::query_as::<_, WebhookEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM fulfillment_webhook_events WHERE event_id = $1"
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_for_fulfillment_order(
        &self,
        fulfillment_order_id: &FulfillmentOrderId,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, RepositoryError> {
        let rows = sqlx::query_as::<_, WebhookEvent>(&format!(
            r"
            SELECT {EVENT_COLUMNS} FROM fulfillment_webhook_events
            WHERE fulfillment_order_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "
        ))
        .bind(fulfillment_order_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
