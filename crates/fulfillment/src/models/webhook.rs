//! Inbound provider webhook event records.

use chrono::{DateTime, Utc};
use podbridge_core::{FulfillmentOrderId, ProviderEventId, WebhookEventStatus};
use serde::Serialize;

/// A webhook delivery, keyed by the provider's event id.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub event_id: ProviderEventId,
    pub event_type: String,
    pub fulfillment_order_id: Option<FulfillmentOrderId>,
    pub payload: sqlx::types::Json<serde_json::Value>,
    pub status: WebhookEventStatus,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A delivery to be claimed for processing.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub event_id: ProviderEventId,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Result of trying to take ownership of an event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the event and must process it.
    Claimed,
    /// The event was already processed; side effects must not be reapplied.
    AlreadyProcessed,
    /// Another handler holds a live processing lease.
    InProgress,
}
