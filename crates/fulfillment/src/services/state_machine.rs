//! Fulfillment status state machine.
//!
//! # Event vocabulary
//!
//! | Provider status | Aliases | Local status |
//! |-----------------|---------|--------------|
//! | `created` | | `SUBMITTED` |
//! | `confirmed` | `passed` | `SUBMITTED` |
//! | `production_ready` | `in_production` | `IN_PRODUCTION` |
//! | `production_finished` | `printed` | `PRODUCED` |
//! | `shipped` | | `SHIPPED` |
//! | `delivered` | | `DELIVERED` |
//! | `cancelled` | `canceled` | `CANCELLED` |
//! | `failed` | | `FAILED` |
//!
//! Event types arrive as `order:<status>`, as a bare status, or as
//! `order_status_updated` / `order_item_status_updated` carrying `data.status`.
//! `order_item_tracking_code_updated` is a shipment. Transitions that do not
//! move strictly forward are discarded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use podbridge_core::{FulfillmentOrderId, FulfillmentStatus};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use super::escrow::{EscrowOutcome, EscrowTrigger};
use crate::db::FulfillmentRepository;
use crate::error::AppError;
use crate::models::{
    FulfillmentOrder, FulfillmentUpdate, TrackingInfo, Transition, TransitionSource,
};
use crate::provider::{FulfillmentProvider, ProviderOrder};

/// Commits retried after losing a compare-and-set race.
const MAX_COMMIT_ATTEMPTS: usize = 3;

const DEFAULT_CANCEL_REASON: &str = "Cancelled by provider";
const DEFAULT_FAILURE_REASON: &str = "Production failed";

/// A provider-reported order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Created,
    Confirmed,
    ProductionReady,
    ProductionFinished,
    Shipped,
    Delivered,
    Cancelled,
    Failed,
}

impl ProviderStatus {
    pub const ALL: [Self; 8] = [
        Self::Created,
        Self::Confirmed,
        Self::ProductionReady,
        Self::ProductionFinished,
        Self::Shipped,
        Self::Delivered,
        Self::Cancelled,
        Self::Failed,
    ];

    /// Parse a status, accepting the provider's own spellings.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "created" => Some(Self::Created),
            "confirmed" | "passed" => Some(Self::Confirmed),
            "production_ready" | "in_production" => Some(Self::ProductionReady),
            "production_finished" | "printed" => Some(Self::ProductionFinished),
            "shipped" => Some(Self::Shipped),
            "delivered" => Some(Self::Delivered),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Confirmed => "confirmed",
            Self::ProductionReady => "production_ready",
            Self::ProductionFinished => "production_finished",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Local status this provider status maps to.
    #[must_use]
    pub const fn target(self) -> FulfillmentStatus {
        match self {
            Self::Created | Self::Confirmed => FulfillmentStatus::Submitted,
            Self::ProductionReady => FulfillmentStatus::InProduction,
            Self::ProductionFinished => FulfillmentStatus::Produced,
            Self::Shipped => FulfillmentStatus::Shipped,
            Self::Delivered => FulfillmentStatus::Delivered,
            Self::Cancelled => FulfillmentStatus::Cancelled,
            Self::Failed => FulfillmentStatus::Failed,
        }
    }
}

/// What an inbound event means for the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Status(ProviderStatus),
    /// Acknowledged without a state change.
    Informational,
    Unknown,
}

/// A provider event reduced to what the state machine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub event_type: String,
    pub kind: EventKind,
    pub tracking: TrackingInfo,
    pub reason: Option<String>,
}

fn status_kind(raw: &str) -> EventKind {
    ProviderStatus::parse(raw).map_or(EventKind::Unknown, EventKind::Status)
}

fn str_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn first_str(data: &JsonValue, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| str_at(data, path)).map(str::to_owned)
}

impl ProviderEvent {
    /// Interpret a webhook event type and its `data` object.
    #[must_use]
    pub fn from_webhook(event_type: &str, data: &JsonValue) -> Self {
        let kind = match event_type.trim() {
            "order_status_updated" | "order_item_status_updated" => {
                str_at(data, &["status"])
                    .or_else(|| str_at(data, &["fulfillmentStatus"]))
                    .and_then(ProviderStatus::parse)
                    .map_or(EventKind::Unknown, EventKind::Status)
            }
            "order_item_tracking_code_updated" => EventKind::Status(ProviderStatus::Shipped),
            "order_delivery_estimate_updated" => EventKind::Informational,
            other => status_kind(other.strip_prefix("order:").map_or(other, str::trim)),
        };

        let tracking = TrackingInfo {
            tracking_number: first_str(data, &[&["trackingCode"], &["shipment", "trackingCode"]]),
            tracking_url: first_str(data, &[&["trackingUrl"], &["shipment", "trackingUrl"]]),
            carrier: first_str(
                data,
                &[
                    &["carrier"],
                    &["shipment", "carrier"],
                    &["shipment", "shipmentMethodName"],
                ],
            ),
        };

        Self {
            event_type: event_type.to_owned(),
            kind,
            tracking,
            reason: first_str(data, &[&["comment"], &["reason"], &["message"]]),
        }
    }

    /// Interpret a polled provider order, using its first shipment's tracking.
    #[must_use]
    pub fn from_provider_order(order: &ProviderOrder) -> Self {
        let status = order.fulfillment_status.as_deref().unwrap_or_default();
        let shipment = order.shipments.first().cloned().unwrap_or_default();
        Self {
            event_type: status.to_owned(),
            kind: status_kind(status),
            tracking: TrackingInfo {
                tracking_number: shipment.tracking_code,
                tracking_url: shipment.tracking_url,
                carrier: shipment.carrier,
            },
            reason: None,
        }
    }
}

/// Result of planning an event against a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Apply(Transition),
    /// Backward, repeated, or out-of-terminal move.
    Discard {
        current: FulfillmentStatus,
        requested: FulfillmentStatus,
    },
    Ignore,
}

/// Plan the transition an event causes. Pure; nothing is written.
#[must_use]
pub fn plan(
    record: &FulfillmentOrder,
    event: &ProviderEvent,
    source: TransitionSource,
    at: DateTime<Utc>,
) -> Plan {
    let EventKind::Status(status) = event.kind else {
        return Plan::Ignore;
    };
    let to = status.target();

    if !record.status.can_transition_to(to) {
        return Plan::Discard {
            current: record.status,
            requested: to,
        };
    }

    let mut update = FulfillmentUpdate::default();
    match to {
        FulfillmentStatus::Pending
        | FulfillmentStatus::Submitted
        | FulfillmentStatus::InProduction => {}
        FulfillmentStatus::Produced => update.produced_at = Some(at),
        FulfillmentStatus::Shipped => {
            update.shipped_at = Some(at);
            update.tracking = event.tracking.clone();
        }
        FulfillmentStatus::Delivered => update.delivered_at = Some(at),
        FulfillmentStatus::Cancelled => {
            update.cancelled_at = Some(at);
            update.failure_reason =
                Some(event.reason.clone().unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string()));
        }
        FulfillmentStatus::Failed => {
            update.failure_reason =
                Some(event.reason.clone().unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string()));
        }
    }

    Plan::Apply(Transition {
        fulfillment_order_id: record.id.clone(),
        order_id: record.order_id.clone(),
        from: record.status,
        to,
        provider_status: status.as_str().to_owned(),
        update,
        source,
        at,
    })
}

/// Result of applying an event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TransitionResult {
    Applied {
        fulfillment_order: Box<FulfillmentOrder>,
        order_delivered: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        escrow: Option<EscrowOutcome>,
    },
    Discarded {
        current: FulfillmentStatus,
        requested: FulfillmentStatus,
    },
    Ignored {
        event_type: String,
    },
}

/// Applies provider events to fulfillment orders.
#[derive(Clone)]
pub struct StatusMachine {
    fulfillment: Arc<dyn FulfillmentRepository>,
    provider: Arc<dyn FulfillmentProvider>,
    escrow: EscrowTrigger,
}

impl StatusMachine {
    #[must_use]
    pub fn new(
        fulfillment: Arc<dyn FulfillmentRepository>,
        provider: Arc<dyn FulfillmentProvider>,
        escrow: EscrowTrigger,
    ) -> Self {
        Self {
            fulfillment,
            provider,
            escrow,
        }
    }

    /// Apply an event to a record, committing atomically with parent-order effects.
    ///
    /// A lost compare-and-set reloads the record and plans again.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record keeps changing underneath.
    #[instrument(
        skip(self, record, event),
        fields(fulfillment_order_id = %record.id, event_type = %event.event_type)
    )]
    pub async fn apply(
        &self,
        record: FulfillmentOrder,
        event: &ProviderEvent,
        source: TransitionSource,
    ) -> Result<TransitionResult, AppError> {
        let mut record = record;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let transition = match plan(&record, event, source, Utc::now()) {
                Plan::Apply(transition) => transition,
                Plan::Discard { current, requested } => {
                    info!(%current, %requested, "Discarding non-forward transition");
                    return Ok(TransitionResult::Discarded { current, requested });
                }
                Plan::Ignore => {
                    if event.kind == EventKind::Informational {
                        debug!("Informational event acknowledged");
                    } else {
                        warn!("Unknown provider event ignored");
                    }
                    return Ok(TransitionResult::Ignored {
                        event_type: event.event_type.clone(),
                    });
                }
            };

            let outcome = self.fulfillment.commit_transition(&transition).await?;
            let Some(updated) = outcome.fulfillment_order else {
                debug!(attempt, "Status moved concurrently, replanning");
                record = self.fulfillment.get(&record.id).await?.ok_or_else(|| {
                    AppError::NotFound(format!("Fulfillment order {} not found", record.id))
                })?;
                continue;
            };

            info!(from = %transition.from, to = %transition.to, "Fulfillment status updated");

            let escrow = if outcome.order_delivered {
                info!(order_id = %updated.order_id, "All lines delivered, triggering escrow");
                Some(self.escrow.on_order_delivered(&updated.order_id).await)
            } else {
                None
            };

            return Ok(TransitionResult::Applied {
                fulfillment_order: Box::new(updated),
                order_delivered: outcome.order_delivered,
                escrow,
            });
        }

        Err(AppError::Processing(format!(
            "Fulfillment order {} changed concurrently {MAX_COMMIT_ATTEMPTS} times",
            record.id
        )))
    }

    /// Record a status decided here rather than reported by the provider.
    ///
    /// Goes through the same compare-and-set commit and delivery rollup as
    /// provider events, so cancelling the last open line can complete an order.
    ///
    /// # Errors
    ///
    /// Same as [`Self::apply`].
    #[instrument(skip(self, record), fields(fulfillment_order_id = %record.id))]
    pub async fn apply_local(
        &self,
        record: FulfillmentOrder,
        status: ProviderStatus,
        reason: &str,
    ) -> Result<TransitionResult, AppError> {
        let event = ProviderEvent {
            event_type: format!("local:{}", status.as_str()),
            kind: EventKind::Status(status),
            tracking: TrackingInfo::default(),
            reason: Some(reason.to_owned()),
        };
        self.apply(record, &event, TransitionSource::Operator).await
    }

    /// Poll the provider and apply its current status.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown id or a record without an
    /// external order id, or the provider error.
    #[instrument(skip(self))]
    pub async fn sync(&self, id: &FulfillmentOrderId) -> Result<TransitionResult, AppError> {
        let record = self
            .fulfillment
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Fulfillment order {id} not found")))?;
        let external_order_id = record.external_order_id.clone().ok_or_else(|| {
            AppError::NotFound(format!("Fulfillment order {id} has no external order id"))
        })?;

        let remote = self.provider.get_order(&record.store_id, &external_order_id).await?;
        let event = ProviderEvent::from_provider_order(&remote);
        self.apply(record, &event, TransitionSource::Sync).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use podbridge_core::{OrderId, OrderItemId, ProductId, StoreId};
    use serde_json::json;

    use FulfillmentStatus as S;

    fn record(status: FulfillmentStatus) -> FulfillmentOrder {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        FulfillmentOrder {
            id: FulfillmentOrderId::new("fo_1"),
            order_id: OrderId::new("ord_1"),
            order_item_id: OrderItemId::new("item_1"),
            product_id: ProductId::new("prod_1"),
            store_id: StoreId::new("store_1"),
            external_order_id: Some("ext_1".to_string()),
            external_reference: "ord_1-item_1".to_string(),
            status,
            provider_status: None,
            shipping_method: "standard".to_string(),
            currency: "USD".to_string(),
            used_platform_account: false,
            tracking_number: None,
            tracking_url: None,
            carrier: None,
            failure_reason: None,
            submitted_at: None,
            produced_at: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn status_event(status: ProviderStatus) -> ProviderEvent {
        ProviderEvent::from_webhook(&format!("order:{}", status.as_str()), &JsonValue::Null)
    }

    #[test]
    fn test_aliases_parse() {
        assert_eq!(ProviderStatus::parse("passed"), Some(ProviderStatus::Confirmed));
        assert_eq!(ProviderStatus::parse("in_production"), Some(ProviderStatus::ProductionReady));
        assert_eq!(ProviderStatus::parse("printed"), Some(ProviderStatus::ProductionFinished));
        assert_eq!(ProviderStatus::parse("canceled"), Some(ProviderStatus::Cancelled));
        assert_eq!(ProviderStatus::parse(" Shipped "), Some(ProviderStatus::Shipped));
        assert_eq!(ProviderStatus::parse("uploading"), None);
        for status in ProviderStatus::ALL {
            assert_eq!(ProviderStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_event_type_shapes() {
        let event = ProviderEvent::from_webhook("order:shipped", &JsonValue::Null);
        assert_eq!(event.kind, EventKind::Status(ProviderStatus::Shipped));

        let event = ProviderEvent::from_webhook("printed", &JsonValue::Null);
        assert_eq!(event.kind, EventKind::Status(ProviderStatus::ProductionFinished));

        let event =
            ProviderEvent::from_webhook("order_status_updated", &json!({"status": "passed"}));
        assert_eq!(event.kind, EventKind::Status(ProviderStatus::Confirmed));

        let event = ProviderEvent::from_webhook("order_status_updated", &json!({}));
        assert_eq!(event.kind, EventKind::Unknown);

        let event = ProviderEvent::from_webhook(
            "order_item_tracking_code_updated",
            &json!({
                "trackingCode": "1Z999",
                "trackingUrl": "https://t.example/1Z999",
                "carrier": "UPS",
            }),
        );
        assert_eq!(event.kind, EventKind::Status(ProviderStatus::Shipped));
        assert_eq!(event.tracking.tracking_number.as_deref(), Some("1Z999"));
        assert_eq!(event.tracking.carrier.as_deref(), Some("UPS"));

        let event = ProviderEvent::from_webhook("order_delivery_estimate_updated", &json!({}));
        assert_eq!(event.kind, EventKind::Informational);

        let event = ProviderEvent::from_webhook("order:teleported", &json!({}));
        assert_eq!(event.kind, EventKind::Unknown);
    }

    #[test]
    fn test_shipment_object_tracking() {
        let event = ProviderEvent::from_webhook(
            "order:shipped",
            &json!({"shipment": {"trackingCode": "TRK", "shipmentMethodName": "DHL"}}),
        );
        assert_eq!(event.tracking.tracking_number.as_deref(), Some("TRK"));
        assert_eq!(event.tracking.carrier.as_deref(), Some("DHL"));
    }

    fn webhook_plan(from: S, event: &ProviderEvent, at: DateTime<Utc>) -> Plan {
        plan(&record(from), event, TransitionSource::Webhook, at)
    }

    #[test]
    fn test_plan_side_effects() {
        let at = Utc::now();

        let finished = status_event(ProviderStatus::ProductionFinished);
        let Plan::Apply(t) = webhook_plan(S::InProduction, &finished, at) else {
            panic!("expected apply");
        };
        assert_eq!(t.to, S::Produced);
        assert_eq!(t.update.produced_at, Some(at));

        let shipped = ProviderEvent::from_webhook("order:shipped", &json!({"trackingCode": "1Z"}));
        let Plan::Apply(t) = webhook_plan(S::Produced, &shipped, at) else {
            panic!("expected apply");
        };
        assert_eq!(t.update.shipped_at, Some(at));
        assert_eq!(t.update.tracking.tracking_number.as_deref(), Some("1Z"));

        let cancelled = status_event(ProviderStatus::Cancelled);
        let Plan::Apply(t) = webhook_plan(S::Submitted, &cancelled, at) else {
            panic!("expected apply");
        };
        assert_eq!(t.update.cancelled_at, Some(at));
        assert_eq!(t.update.failure_reason.as_deref(), Some(DEFAULT_CANCEL_REASON));

        let failed =
            ProviderEvent::from_webhook("order:failed", &json!({"comment": "Bad artwork"}));
        let Plan::Apply(t) = webhook_plan(S::InProduction, &failed, at) else {
            panic!("expected apply");
        };
        assert_eq!(t.update.failure_reason.as_deref(), Some("Bad artwork"));
    }

    #[test]
    fn test_every_event_from_every_state() {
        for from in FulfillmentStatus::ALL {
            for status in ProviderStatus::ALL {
                let to = status.target();
                let result = webhook_plan(from, &status_event(status), Utc::now());
                match result {
                    Plan::Apply(t) => {
                        assert!(from.can_transition_to(to), "{from} -> {to} should be rejected");
                        assert_eq!(t.from, from);
                        assert_eq!(t.to, to);
                    }
                    Plan::Discard { current, requested } => {
                        assert!(!from.can_transition_to(to), "{from} -> {to} should apply");
                        assert_eq!((current, requested), (from, to));
                    }
                    Plan::Ignore => panic!("status events are never ignored"),
                }
            }
        }
    }

    #[test]
    fn test_backward_and_terminal_moves_are_discarded() {
        let at = Utc::now();
        for (from, status) in [
            (S::Shipped, ProviderStatus::ProductionReady),
            (S::Shipped, ProviderStatus::Shipped),
            (S::Delivered, ProviderStatus::Cancelled),
        ] {
            assert!(matches!(
                webhook_plan(from, &status_event(status), at),
                Plan::Discard { .. }
            ));
        }
        let mystery = ProviderEvent::from_webhook("mystery", &json!({}));
        assert_eq!(webhook_plan(S::Submitted, &mystery, at), Plan::Ignore);
    }

    #[test]
    fn test_from_provider_order_uses_first_shipment() {
        let order: ProviderOrder = serde_json::from_value(json!({
            "id": "ext_1",
            "fulfillmentStatus": "shipped",
            "shipments": [
                {"trackingCode": "FIRST", "trackingUrl": "https://t.example/FIRST"},
                {"trackingCode": "SECOND"}
            ]
        }))
        .unwrap();
        let event = ProviderEvent::from_provider_order(&order);
        assert_eq!(event.kind, EventKind::Status(ProviderStatus::Shipped));
        assert_eq!(event.tracking.tracking_number.as_deref(), Some("FIRST"));
    }

    #[tokio::test]
    async fn test_escrow_fires_once_when_last_line_delivers() {
        use crate::models::EscrowTransaction;
        use crate::testing::Harness;
        use podbridge_core::{EscrowId, EscrowStatus};

        let h = Harness::new();
        let lines = h.submitted_lines("ord_1", 2).await;
        h.memory.add_escrow(EscrowTransaction {
            id: EscrowId::new("esc_1"),
            order_id: OrderId::new("ord_1"),
            status: EscrowStatus::Held,
            auto_release_at: None,
            delivery_confirmed: false,
            delivery_confirmed_at: None,
        });
        let delivered = status_event(ProviderStatus::Delivered);

        let first = h
            .services
            .machine
            .apply(lines[0].clone(), &delivered, TransitionSource::Webhook)
            .await
            .unwrap();
        assert!(matches!(
            first,
            TransitionResult::Applied { order_delivered: false, escrow: None, .. }
        ));

        let second = h
            .services
            .machine
            .apply(lines[1].clone(), &delivered, TransitionSource::Webhook)
            .await
            .unwrap();
        assert!(matches!(
            second,
            TransitionResult::Applied {
                order_delivered: true,
                escrow: Some(EscrowOutcome::PendingRelease { .. }),
                ..
            }
        ));
        assert_eq!(h.memory.delivery_confirmations().len(), 1);
    }

    #[tokio::test]
    async fn test_undelivered_sibling_keeps_escrow_held_in_either_order() {
        use crate::models::EscrowTransaction;
        use crate::testing::Harness;
        use podbridge_core::{EscrowId, EscrowStatus, OrderStatus};

        let delivered = status_event(ProviderStatus::Delivered);

        for closing in [ProviderStatus::Cancelled, ProviderStatus::Failed] {
            let closing = status_event(closing);
            for deliver_first in [false, true] {
                let h = Harness::new();
                let lines = h.submitted_lines("ord_1", 2).await;
                h.memory.add_escrow(EscrowTransaction {
                    id: EscrowId::new("esc_1"),
                    order_id: OrderId::new("ord_1"),
                    status: EscrowStatus::Held,
                    auto_release_at: None,
                    delivery_confirmed: false,
                    delivery_confirmed_at: None,
                });
                let steps = if deliver_first {
                    [(&lines[0], &delivered), (&lines[1], &closing)]
                } else {
                    [(&lines[1], &closing), (&lines[0], &delivered)]
                };

                for (line, event) in steps {
                    let result = h
                        .services
                        .machine
                        .apply(line.clone(), event, TransitionSource::Webhook)
                        .await
                        .unwrap();
                    assert!(
                        matches!(
                            result,
                            TransitionResult::Applied { order_delivered: false, escrow: None, .. }
                        ),
                        "{:?} deliver_first={deliver_first}",
                        closing.kind
                    );
                }

                assert_eq!(h.memory.order_status(&OrderId::new("ord_1")), Some(OrderStatus::Paid));
                assert_eq!(
                    h.memory.escrow(&OrderId::new("ord_1")).unwrap().status,
                    EscrowStatus::Held
                );
                assert!(h.memory.delivery_confirmations().is_empty());
            }
        }
    }

    #[tokio::test]
    async fn test_resubmitted_line_counts_once_delivered() {
        use crate::services::SubmitRequest;
        use crate::testing::Harness;
        use podbridge_core::OrderStatus;

        let h = Harness::new();
        let lines = h.submitted_lines("ord_1", 2).await;
        let delivered = status_event(ProviderStatus::Delivered);

        let failed = status_event(ProviderStatus::Failed);
        h.services
            .machine
            .apply(lines[1].clone(), &failed, TransitionSource::Webhook)
            .await
            .unwrap();
        let retry = h
            .services
            .submission
            .submit(SubmitRequest {
                order_id: OrderId::new("ord_1"),
                order_item_id: lines[1].order_item_id.clone(),
                shipping_method: None,
            })
            .await
            .unwrap();

        let first = h
            .services
            .machine
            .apply(lines[0].clone(), &delivered, TransitionSource::Webhook)
            .await
            .unwrap();
        assert!(matches!(first, TransitionResult::Applied { order_delivered: false, .. }));

        let last = h
            .services
            .machine
            .apply(retry, &delivered, TransitionSource::Webhook)
            .await
            .unwrap();
        assert!(matches!(last, TransitionResult::Applied { order_delivered: true, .. }));
        assert_eq!(h.memory.order_status(&OrderId::new("ord_1")), Some(OrderStatus::Delivered));
    }

    #[tokio::test]
    async fn test_stale_record_is_replanned_after_lost_race() {
        use crate::testing::Harness;

        let h = Harness::new();
        let line = h.submitted_lines("ord_1", 1).await.remove(0);
        h.services
            .machine
            .apply(line.clone(), &status_event(ProviderStatus::Shipped), TransitionSource::Webhook)
            .await
            .unwrap();

        // The caller's copy still says SUBMITTED; the reload sees SHIPPED.
        let result = h
            .services
            .machine
            .apply(
                line,
                &status_event(ProviderStatus::ProductionFinished),
                TransitionSource::Webhook,
            )
            .await
            .unwrap();
        assert!(matches!(
            result,
            TransitionResult::Discarded {
                current: S::Shipped,
                requested: S::Produced
            }
        ));
    }

    #[tokio::test]
    async fn test_sync_requires_external_id() {
        use crate::provider::fake::ScriptedFailure;
        use crate::testing::Harness;

        let h = Harness::new();
        h.seed_order("ord_1", 1);
        h.provider.fail_next_create(ScriptedFailure::Timeout);
        assert!(h.try_submitted_lines("ord_1", 1).await.is_err());
        let pending = h.memory.fulfillment_orders().remove(0);
        assert_eq!(pending.status, S::Pending);

        let err = h.services.machine.sync(&pending.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(matches!(
            h.services.machine.sync(&FulfillmentOrderId::new("fo_missing")).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_applies_remote_status() {
        use crate::testing::Harness;

        let h = Harness::new();
        let line = h.submitted_lines("ord_1", 1).await.remove(0);
        let external = line.external_order_id.clone().unwrap();
        h.provider.set_remote_order(
            serde_json::from_value(json!({"id": external, "fulfillmentStatus": "printed"}))
                .unwrap(),
        );

        let result = h.services.machine.sync(&line.id).await.unwrap();
        assert!(matches!(result, TransitionResult::Applied { .. }));
        let stored = h.fulfillment_order(&line.id).await;
        assert_eq!(stored.status, S::Produced);
        assert!(stored.produced_at.is_some());
        assert_eq!(stored.provider_status.as_deref(), Some("production_finished"));
    }
}
