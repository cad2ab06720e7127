//! Provider webhook ingestion.
//!
//! Every delivery is signature-checked, then claimed by event id so a
//! redelivered event never applies its side effects twice.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use podbridge_core::{ProviderEventId, StoreId};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::Sha256;
use tracing::{error, info, instrument, warn};

use super::credential_store::{CredentialStore, CredentialStoreError};
use super::seller_settings::decode_store_webhook_key;
use super::state_machine::{EventKind, ProviderEvent, StatusMachine, TransitionResult};
use crate::db::{FulfillmentRepository, WebhookEventRepository};
use crate::error::AppError;
use crate::models::{ClaimOutcome, NewWebhookEvent, TransitionSource};

/// How long a `PROCESSING` claim blocks redeliveries.
pub const DEFAULT_PROCESSING_LEASE: Duration = Duration::from_secs(60);

/// Request header carrying the hex HMAC-SHA256 of the body.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

type HmacSha256 = Hmac<Sha256>;

/// Check a hex HMAC-SHA256 signature, optionally prefixed with `sha256=`.
///
/// The comparison is constant-time.
#[must_use]
pub fn verify_signature(secret: &SecretString, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let hex_digest = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(provided) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// Hex HMAC-SHA256 of a body, as the provider sends it.
#[must_use]
pub fn sign(secret: &SecretString, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Why a delivery was acknowledged without a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InvalidPayload,
    MissingEventId,
    Duplicate,
    InProgress,
    MissingOrderId,
    OrderNotFound,
    StaleTransition,
    Informational,
    UnknownEvent,
    ProcessingFailed,
}

impl SkipReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPayload => "invalid_payload",
            Self::MissingEventId => "missing_event_id",
            Self::Duplicate => "duplicate",
            Self::InProgress => "in_progress",
            Self::MissingOrderId => "missing_order_id",
            Self::OrderNotFound => "order_not_found",
            Self::StaleTransition => "stale_transition",
            Self::Informational => "informational",
            Self::UnknownEvent => "unknown_event",
            Self::ProcessingFailed => "processing_failed",
        }
    }
}

/// Result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookOutcome {
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
}

impl WebhookOutcome {
    const fn processed() -> Self {
        Self {
            processed: true,
            reason: None,
        }
    }

    #[must_use]
    pub const fn skipped(reason: SkipReason) -> Self {
        Self {
            processed: false,
            reason: Some(reason),
        }
    }
}

/// Event id as a string; providers send either strings or numbers.
fn event_id(payload: &JsonValue) -> Option<ProviderEventId> {
    match payload.get("id")? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(ProviderEventId::new(s.trim())),
        JsonValue::Number(n) => Some(ProviderEventId::new(n.to_string())),
        _ => None,
    }
}

/// External order id: `data.orderId`, else `data.order.id`, else `data.id`.
fn external_order_id(data: &JsonValue) -> Option<String> {
    [
        data.get("orderId"),
        data.get("order").and_then(|order| order.get("id")),
        data.get("id"),
    ]
    .into_iter()
    .flatten()
    .find_map(|value| match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Verifies, deduplicates and applies provider webhooks.
#[derive(Clone)]
pub struct WebhookProcessor {
    credentials: CredentialStore,
    platform_secret: Option<SecretString>,
    events: Arc<dyn WebhookEventRepository>,
    fulfillment: Arc<dyn FulfillmentRepository>,
    machine: StatusMachine,
    lease: Duration,
}

impl WebhookProcessor {
    #[must_use]
    pub fn new(
        credentials: CredentialStore,
        platform_secret: Option<SecretString>,
        events: Arc<dyn WebhookEventRepository>,
        fulfillment: Arc<dyn FulfillmentRepository>,
        machine: StatusMachine,
    ) -> Self {
        Self {
            credentials,
            platform_secret,
            events,
            fulfillment,
            machine,
            lease: DEFAULT_PROCESSING_LEASE,
        }
    }

    #[must_use]
    pub const fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// The tenant's stored secret when the key names one, else the platform secret.
    ///
    /// A stored secret that cannot be decrypted fails verification rather than
    /// falling back.
    async fn secret_for(
        &self,
        store_id: Option<&StoreId>,
    ) -> Result<Option<SecretString>, AppError> {
        let Some(store_id) = store_id else {
            return Ok(self.platform_secret.clone());
        };
        match self.credentials.webhook_secret(store_id).await {
            Ok(Some(secret)) => Ok(Some(secret)),
            Ok(None) => Ok(self.platform_secret.clone()),
            Err(CredentialStoreError::Crypto(e)) => {
                warn!(
                    store_id = %store_id,
                    error = %e,
                    "Stored webhook secret cannot be decrypted"
                );
                Err(AppError::Unauthorized(
                    "Webhook secret for this store is unreadable".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Handle one delivery.
    ///
    /// `store_key` is the path segment of a tenant webhook URL.
    ///
    /// # Errors
    ///
    /// - [`AppError::Unauthorized`] for a missing or invalid signature, or a
    ///   tenant URL whose store key does not decode
    /// - [`AppError::Processing`] if the claimed event failed to apply
    /// - [`AppError::Database`] if the secret lookup or the claim failed
    #[instrument(
        skip(self, signature, body),
        fields(event_id = tracing::field::Empty, event_type = tracing::field::Empty)
    )]
    pub async fn handle(
        &self,
        store_key: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, AppError> {
        let store_id = store_key
            .map(|key| {
                decode_store_webhook_key(key).ok_or_else(|| {
                    warn!("Undecodable store key on webhook URL");
                    AppError::Unauthorized("Unknown webhook endpoint".to_string())
                })
            })
            .transpose()?;

        let Some(secret) = self.secret_for(store_id.as_ref()).await? else {
            warn!("Webhook received but no webhook secret is configured");
            return Err(AppError::Unauthorized("Webhook secret not configured".to_string()));
        };
        let Some(signature) = signature else {
            warn!("Webhook missing signature");
            return Err(AppError::Unauthorized("Missing webhook signature".to_string()));
        };
        if !verify_signature(&secret, body, signature) {
            warn!("Webhook signature mismatch");
            return Err(AppError::Unauthorized("Invalid webhook signature".to_string()));
        }

        let Ok(payload) = serde_json::from_slice::<JsonValue>(body) else {
            warn!("Webhook body is not valid JSON");
            return Ok(WebhookOutcome::skipped(SkipReason::InvalidPayload));
        };
        let Some(event_id) = event_id(&payload) else {
            warn!("Webhook payload has no event id");
            return Ok(WebhookOutcome::skipped(SkipReason::MissingEventId));
        };
        let event_type = payload
            .get("event")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_owned();

        let span = tracing::Span::current();
        span.record("event_id", event_id.as_str());
        span.record("event_type", event_type.as_str());

        let claim = self
            .events
            .claim(
                &NewWebhookEvent {
                    event_id: event_id.clone(),
                    event_type: event_type.clone(),
                    payload: payload.clone(),
                },
                self.lease,
            )
            .await?;
        match claim {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::AlreadyProcessed => {
                info!("Duplicate webhook delivery");
                return Ok(WebhookOutcome::skipped(SkipReason::Duplicate));
            }
            ClaimOutcome::InProgress => {
                info!("Webhook delivery already in progress");
                return Ok(WebhookOutcome::skipped(SkipReason::InProgress));
            }
        }

        let data = payload.get("data").cloned().unwrap_or(JsonValue::Null);
        match self
            .process(&event_id, &event_type, &data, store_id.as_ref())
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(error = %e, "Webhook processing failed");
                if let Err(mark_err) = self.events.mark_failed(&event_id, &e.to_string()).await {
                    error!(error = %mark_err, "Failed to record webhook failure");
                }
                Err(AppError::Processing(e.to_string()))
            }
        }
    }

    async fn process(
        &self,
        event_id: &ProviderEventId,
        event_type: &str,
        data: &JsonValue,
        store_id: Option<&StoreId>,
    ) -> Result<WebhookOutcome, AppError> {
        let Some(external_order_id) = external_order_id(data) else {
            warn!("Webhook payload has no order id");
            let reason = SkipReason::MissingOrderId;
            self.events.mark_failed(event_id, reason.as_str()).await?;
            return Ok(WebhookOutcome::skipped(reason));
        };

        let record = self
            .fulfillment
            .find_by_external_id(&external_order_id)
            .await?
            .filter(|record| store_id.is_none_or(|store| &record.store_id == store));
        let Some(record) = record else {
            warn!(%external_order_id, "Webhook for unknown provider order");
            let reason = SkipReason::OrderNotFound;
            self.events.mark_failed(event_id, reason.as_str()).await?;
            return Ok(WebhookOutcome::skipped(reason));
        };

        self.events.attach_fulfillment_order(event_id, &record.id).await?;

        let event = ProviderEvent::from_webhook(event_type, data);
        let informational = event.kind == EventKind::Informational;
        let result = self.machine.apply(record, &event, TransitionSource::Webhook).await?;
        self.events.mark_processed(event_id).await?;

        Ok(match result {
            TransitionResult::Applied { .. } => WebhookOutcome::processed(),
            TransitionResult::Discarded { .. } => {
                WebhookOutcome::skipped(SkipReason::StaleTransition)
            }
            TransitionResult::Ignored { .. } if informational => {
                WebhookOutcome::skipped(SkipReason::Informational)
            }
            TransitionResult::Ignored { .. } => WebhookOutcome::skipped(SkipReason::UnknownEvent),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::testing::{Harness, PLATFORM_WEBHOOK_SECRET, webhook_body};
    use podbridge_core::{FulfillmentStatus, OrderId, OrderStatus, WebhookEventStatus};
    use serde_json::json;

    fn platform_secret() -> SecretString {
        SecretString::from(PLATFORM_WEBHOOK_SECRET)
    }

    async fn deliver(h: &Harness, body: &[u8]) -> Result<WebhookOutcome, AppError> {
        let signature = sign(&platform_secret(), body);
        h.services.webhooks.handle(None, Some(&signature), body).await
    }

    #[test]
    fn test_signature_formats() {
        let secret = SecretString::from("s3cret");
        let body = br#"{"id":"evt_1"}"#;
        let signature = sign(&secret, body);

        assert!(verify_signature(&secret, body, &signature));
        assert!(verify_signature(&secret, body, &format!("sha256={signature}")));
        assert!(!verify_signature(&secret, b"tampered", &signature));
        assert!(!verify_signature(&SecretString::from("other"), body, &signature));
        assert!(!verify_signature(&secret, body, "not-hex"));
    }

    #[test]
    fn test_external_order_id_sources() {
        assert_eq!(external_order_id(&json!({"orderId": "a", "id": "c"})).as_deref(), Some("a"));
        assert_eq!(
            external_order_id(&json!({"order": {"id": "b"}, "id": "c"})).as_deref(),
            Some("b")
        );
        assert_eq!(external_order_id(&json!({"id": 42})).as_deref(), Some("42"));
        assert_eq!(external_order_id(&json!({"status": "shipped"})), None);
    }

    #[tokio::test]
    async fn test_signature_required() {
        let h = Harness::new();
        let body = webhook_body("evt_1", "order:shipped", "ext_1", json!({}));

        let err = h.services.webhooks.handle(None, None, &body).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let err = h
            .services
            .webhooks
            .handle(None, Some("deadbeef"), &body)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert!(h.memory.webhook_event(&ProviderEventId::new("evt_1")).is_none());
    }

    #[tokio::test]
    async fn test_undecodable_store_key_is_unauthorized() {
        let h = Harness::new();
        let body = webhook_body("evt_1", "order:shipped", "ext_1", json!({}));
        let signature = sign(&platform_secret(), &body);

        let err = h
            .services
            .webhooks
            .handle(Some("not*a*key"), Some(&signature), &body)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert!(h.memory.webhook_event(&ProviderEventId::new("evt_1")).is_none());
    }

    #[tokio::test]
    async fn test_unrecordable_failure_keeps_processing_error() {
        use crate::testing::EventStoreFault;

        let h = Harness::builder()
            .event_store_fault(EventStoreFault::AttachAndMarkFailed)
            .build();
        let fo = h.submitted_lines("ord_1", 1).await.remove(0);
        let external = fo.external_order_id.clone().unwrap();

        let err = deliver(&h, &webhook_body("evt_1", "order:shipped", &external, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Processing(_)), "{err:?}");
        assert_eq!(h.fulfillment_order(&fo.id).await.status, FulfillmentStatus::Submitted);
    }

    #[tokio::test]
    async fn test_no_secret_configured_is_unauthorized() {
        let h = Harness::builder().platform_webhook_secret(None).build();
        let body = webhook_body("evt_1", "order:shipped", "ext_1", json!({}));
        let signature = sign(&platform_secret(), &body);
        let err = h
            .services
            .webhooks
            .handle(None, Some(&signature), &body)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_shipped_webhook_updates_order_and_tracking() {
        let h = Harness::new();
        let fo = h.submitted_lines("ord_1", 1).await.remove(0);
        let external = fo.external_order_id.clone().unwrap();

        let body = webhook_body(
            "evt_1",
            "order:shipped",
            &external,
            json!({
                "trackingCode": "1Z999",
                "trackingUrl": "https://t.example/1Z999",
                "carrier": "UPS",
            }),
        );
        let outcome = deliver(&h, &body).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::processed());

        let stored = h.fulfillment_order(&fo.id).await;
        assert_eq!(stored.status, FulfillmentStatus::Shipped);
        assert_eq!(stored.tracking_number.as_deref(), Some("1Z999"));
        assert_eq!(stored.carrier.as_deref(), Some("UPS"));
        assert!(stored.shipped_at.is_some());
        assert_eq!(h.memory.order_status(&OrderId::new("ord_1")), Some(OrderStatus::Shipped));

        let event = h.memory.webhook_event(&ProviderEventId::new("evt_1")).unwrap();
        assert_eq!(event.status, WebhookEventStatus::Processed);
        assert_eq!(event.fulfillment_order_id, Some(fo.id.clone()));
        assert!(event.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_replay_is_acknowledged_as_duplicate() {
        let h = Harness::new();
        let fo = h.submitted_lines("ord_1", 1).await.remove(0);
        let body = webhook_body(
            "evt_1",
            "order:shipped",
            fo.external_order_id.as_deref().unwrap(),
            json!({"trackingCode": "1Z999"}),
        );

        deliver(&h, &body).await.unwrap();
        let after_first = h.fulfillment_order(&fo.id).await;
        let timeline_len = h.memory.timeline(&OrderId::new("ord_1")).len();

        let outcome = deliver(&h, &body).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::skipped(SkipReason::Duplicate));
        assert_eq!(h.fulfillment_order(&fo.id).await, after_first);
        assert_eq!(h.memory.timeline(&OrderId::new("ord_1")).len(), timeline_len);
    }

    #[tokio::test]
    async fn test_unknown_external_order_marks_event_failed() {
        let h = Harness::new();
        let body = webhook_body("evt_9", "order:shipped", "ext_missing", json!({}));

        let outcome = deliver(&h, &body).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::skipped(SkipReason::OrderNotFound));

        let event = h.memory.webhook_event(&ProviderEventId::new("evt_9")).unwrap();
        assert_eq!(event.status, WebhookEventStatus::Failed);
        assert_eq!(event.error_message.as_deref(), Some("order_not_found"));
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_acknowledged() {
        let h = Harness::new();
        assert_eq!(
            deliver(&h, b"not json").await.unwrap(),
            WebhookOutcome::skipped(SkipReason::InvalidPayload)
        );
        assert_eq!(
            deliver(&h, br#"{"event":"order:shipped","data":{}}"#).await.unwrap(),
            WebhookOutcome::skipped(SkipReason::MissingEventId)
        );
        assert_eq!(
            deliver(&h, br#"{"id":"evt_2","event":"order:shipped","data":{}}"#)
                .await
                .unwrap(),
            WebhookOutcome::skipped(SkipReason::MissingOrderId)
        );
    }

    #[tokio::test]
    async fn test_backward_and_unknown_events_are_processed_without_change() {
        let h = Harness::new();
        let fo = h.submitted_lines("ord_1", 1).await.remove(0);
        let external = fo.external_order_id.clone().unwrap();

        deliver(&h, &webhook_body("evt_1", "order:shipped", &external, json!({})))
            .await
            .unwrap();
        let late = webhook_body("evt_2", "order:production_ready", &external, json!({}));
        let outcome = deliver(&h, &late).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::skipped(SkipReason::StaleTransition));

        let outcome = deliver(&h, &webhook_body("evt_3", "order:teleported", &external, json!({})))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::skipped(SkipReason::UnknownEvent));

        assert_eq!(h.fulfillment_order(&fo.id).await.status, FulfillmentStatus::Shipped);
        let event = h.memory.webhook_event(&ProviderEventId::new("evt_2")).unwrap();
        assert_eq!(event.status, WebhookEventStatus::Processed);
    }

    #[tokio::test]
    async fn test_tenant_secret_and_store_scoping() {
        let h = Harness::new();
        let fo = h.submitted_lines("ord_1", 1).await.remove(0);
        h.configure_seller("store_1", Some("whsec_tenant")).await;
        let key = crate::services::seller_settings::store_webhook_key(&fo.store_id);
        let body = webhook_body(
            "evt_1",
            "order:production_ready",
            fo.external_order_id.as_deref().unwrap(),
            json!({}),
        );

        let platform_signed = sign(&platform_secret(), &body);
        let err = h
            .services
            .webhooks
            .handle(Some(&key), Some(&platform_signed), &body)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let tenant_signed = sign(&SecretString::from("whsec_tenant"), &body);
        let outcome = h
            .services
            .webhooks
            .handle(Some(&key), Some(&tenant_signed), &body)
            .await
            .unwrap();
        assert!(outcome.processed);

        let other_key =
            crate::services::seller_settings::store_webhook_key(&StoreId::new("store_2"));
        let body = webhook_body(
            "evt_2",
            "order:production_finished",
            fo.external_order_id.as_deref().unwrap(),
            json!({}),
        );
        let outcome = h
            .services
            .webhooks
            .handle(Some(&other_key), Some(&sign(&platform_secret(), &body)), &body)
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::skipped(SkipReason::OrderNotFound));
    }

    #[tokio::test]
    async fn test_unreadable_tenant_secret_is_unauthorized() {
        let h = Harness::new();
        let fo = h.submitted_lines("ord_1", 1).await.remove(0);
        h.configure_seller("store_1", Some("whsec_tenant")).await;
        let mut stored = h.memory.credential(&fo.store_id).unwrap();
        stored.webhook_secret_encrypted = Some("not-ciphertext".to_string());
        h.memory.insert_credential(stored);

        let key = crate::services::seller_settings::store_webhook_key(&fo.store_id);
        let body = webhook_body(
            "evt_1",
            "order:production_ready",
            fo.external_order_id.as_deref().unwrap(),
            json!({}),
        );
        for secret in [SecretString::from("whsec_tenant"), platform_secret()] {
            let err = h
                .services
                .webhooks
                .handle(Some(&key), Some(&sign(&secret, &body)), &body)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Unauthorized(ref m) if m.contains("unreadable")));
        }
        assert!(h.memory.webhook_event(&ProviderEventId::new("evt_1")).is_none());
        assert_eq!(h.fulfillment_order(&fo.id).await.status, FulfillmentStatus::Submitted);
    }
}
