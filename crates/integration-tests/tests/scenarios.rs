//! End-to-end fulfillment scenarios over the in-memory harness.
//!
//! Each test walks one path a marketplace order takes: submission to the
//! provider, a duplicate submission, a shipped webhook, a replayed webhook,
//! and a webhook for an order this service never created.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use podbridge_core::{
    FulfillmentStatus, OrderId, OrderItemId, OrderStatus, ProviderEventId, WebhookEventStatus,
};
use podbridge_fulfillment::error::AppError;
use podbridge_fulfillment::services::SubmitRequest;
use podbridge_fulfillment::services::webhooks::SkipReason;
use podbridge_fulfillment::testing::{Harness, webhook_body};
use serde_json::json;

fn submit_request(order_id: &str, item: &OrderItemId) -> SubmitRequest {
    SubmitRequest {
        order_id: OrderId::new(order_id),
        order_item_id: item.clone(),
        shipping_method: None,
    }
}

// =============================================================================
// Scenario A: submit one line
// =============================================================================

#[tokio::test]
async fn test_scenario_a_submit_creates_provider_order() {
    let h = Harness::new();
    let items = h.seed_order("ord_a", 1);

    let fo = h
        .services
        .submission
        .submit(submit_request("ord_a", &items[0]))
        .await
        .unwrap();

    assert_eq!(fo.status, FulfillmentStatus::Submitted);
    assert!(fo.external_order_id.is_some());
    assert!(fo.submitted_at.is_some());
    assert_eq!(fo.order_item_id, items[0]);

    let created = h.provider.created_orders();
    assert_eq!(created.len(), 1);
    let (_, request) = &created[0];
    assert_eq!(request.items.len(), 1);
    assert_eq!(request.items[0].product_uid, "flat_a3_poster");
    assert_eq!(request.shipping_address.country, "GB");
}

// =============================================================================
// Scenario B: duplicate submission
// =============================================================================

#[tokio::test]
async fn test_scenario_b_duplicate_submit_conflicts() {
    let h = Harness::new();
    let items = h.seed_order("ord_b", 1);
    let request = submit_request("ord_b", &items[0]);

    h.services.submission.submit(request.clone()).await.unwrap();
    let err = h.services.submission.submit(request).await.unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(h.provider.created_orders().len(), 1);
    assert_eq!(h.memory.fulfillment_orders().len(), 1);
}

// =============================================================================
// Scenario C: shipped webhook
// =============================================================================

#[tokio::test]
async fn test_scenario_c_shipped_webhook_records_tracking() {
    let h = Harness::new();
    let fo = h.submitted_lines("ord_c", 1).await.remove(0);
    let external = fo.external_order_id.clone().unwrap();

    let outcome = h
        .deliver(&webhook_body(
            "evt_c1",
            "order:shipped",
            &external,
            json!({
                "trackingCode": "1Z999AA10123456784",
                "trackingUrl": "https://track.example.com/1Z999AA10123456784",
                "carrier": "UPS"
            }),
        ))
        .await
        .unwrap();
    assert!(outcome.processed);
    assert_eq!(outcome.reason, None);

    let stored = h.fulfillment_order(&fo.id).await;
    assert_eq!(stored.status, FulfillmentStatus::Shipped);
    assert_eq!(stored.tracking_number.as_deref(), Some("1Z999AA10123456784"));
    assert_eq!(
        stored.tracking_url.as_deref(),
        Some("https://track.example.com/1Z999AA10123456784")
    );
    assert_eq!(stored.carrier.as_deref(), Some("UPS"));
    assert!(stored.shipped_at.is_some());

    assert_eq!(h.memory.order_status(&OrderId::new("ord_c")), Some(OrderStatus::Shipped));
    let event = h.memory.webhook_event(&ProviderEventId::new("evt_c1")).unwrap();
    assert_eq!(event.status, WebhookEventStatus::Processed);
}

// =============================================================================
// Scenario D: replayed webhook
// =============================================================================

#[tokio::test]
async fn test_scenario_d_replay_changes_nothing() {
    let h = Harness::new();
    let fo = h.submitted_lines("ord_d", 1).await.remove(0);
    let body = webhook_body(
        "evt_d1",
        "order:shipped",
        fo.external_order_id.as_deref().unwrap(),
        json!({"trackingCode": "1Z1"}),
    );

    h.deliver(&body).await.unwrap();
    let after_first = h.fulfillment_order(&fo.id).await;
    let timeline = h.memory.timeline(&OrderId::new("ord_d")).len();

    let replay = h.deliver(&body).await.unwrap();
    assert!(!replay.processed);
    assert_eq!(replay.reason, Some(SkipReason::Duplicate));
    assert_eq!(h.fulfillment_order(&fo.id).await, after_first);
    assert_eq!(h.memory.timeline(&OrderId::new("ord_d")).len(), timeline);
}

// =============================================================================
// Scenario E: unknown external order
// =============================================================================

#[tokio::test]
async fn test_scenario_e_unknown_external_order_is_acknowledged() {
    let h = Harness::new();
    h.submitted_lines("ord_e", 1).await;

    let outcome = h
        .deliver(&webhook_body("evt_e1", "order:shipped", "ext_never_created", json!({})))
        .await
        .unwrap();
    assert!(!outcome.processed);
    assert_eq!(outcome.reason, Some(SkipReason::OrderNotFound));

    let event = h.memory.webhook_event(&ProviderEventId::new("evt_e1")).unwrap();
    assert_eq!(event.status, WebhookEventStatus::Failed);
    assert!(
        h.memory
            .fulfillment_orders()
            .iter()
            .all(|fo| fo.status == FulfillmentStatus::Submitted)
    );
}
