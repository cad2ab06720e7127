//! HTTP API tests driven through the axum router.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use podbridge_fulfillment::routes;
use podbridge_fulfillment::services::webhooks::{SIGNATURE_HEADER, sign};
use podbridge_fulfillment::state::AppState;
use podbridge_fulfillment::testing::{Harness, PLATFORM_WEBHOOK_SECRET, SELLER_STORE, webhook_body};
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    routes::routes().with_state(AppState::in_memory(h.services.clone()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let h = Harness::new();

    let response = app(&h)
        .oneshot(empty_request(Method::GET, "/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");

    let response = app(&h)
        .oneshot(empty_request(Method::GET, "/health/ready"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Fulfillment orders
// =============================================================================

#[tokio::test]
async fn test_submit_list_and_cancel() {
    let h = Harness::new();
    let items = h.seed_order("ord_1", 1);
    let submit = json!({"orderId": "ord_1", "orderItemId": items[0].as_str()});

    let (status, body) =
        send(app(&h), json_request(Method::POST, "/fulfillment/orders", &submit)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "SUBMITTED");
    let id = body["data"]["id"].as_str().unwrap().to_owned();

    let (status, body) =
        send(app(&h), json_request(Method::POST, "/fulfillment/orders", &submit)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().starts_with("Conflict"));

    let (status, body) = send(
        app(&h),
        empty_request(Method::GET, "/fulfillment/orders?status=SUBMITTED&orderId=ord_1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        app(&h),
        empty_request(Method::POST, &format!("/fulfillment/orders/{id}/cancel")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "CANCELLED");
    assert_eq!(h.provider.cancelled().len(), 1);
}

#[tokio::test]
async fn test_unknown_fulfillment_order_is_not_found() {
    let h = Harness::new();

    let (status, body) =
        send(app(&h), empty_request(Method::GET, "/fulfillment/orders/fo_missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_batch_submission_reports_lines() {
    let h = Harness::new();
    h.seed_order("ord_2", 2);

    let (status, body) = send(
        app(&h),
        json_request(Method::POST, "/fulfillment/orders/batch", &json!({"orderId": "ord_2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["submitted"], 2);
    assert_eq!(body["data"]["lines"].as_array().unwrap().len(), 2);
}

// =============================================================================
// Webhooks
// =============================================================================

#[tokio::test]
async fn test_webhook_requires_signature() {
    let h = Harness::new();
    let fo = h.submitted_lines("ord_1", 1).await.remove(0);
    let body = webhook_body(
        "evt_1",
        "order:shipped",
        fo.external_order_id.as_deref().unwrap(),
        json!({}),
    );

    let unsigned = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/provider")
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _) = send(app(&h), unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let signed = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/provider")
        .header(SIGNATURE_HEADER, sign(&SecretString::from(PLATFORM_WEBHOOK_SECRET), &body))
        .body(Body::from(body))
        .unwrap();
    let (status, ack) = send(app(&h), signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({"received": true, "processed": true}));
}

#[tokio::test]
async fn test_webhook_for_unknown_order_is_acknowledged() {
    let h = Harness::new();
    let body = webhook_body("evt_1", "order:shipped", "ext_unknown", json!({}));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/provider")
        .header(SIGNATURE_HEADER, sign(&SecretString::from(PLATFORM_WEBHOOK_SECRET), &body))
        .body(Body::from(body))
        .unwrap();
    let (status, ack) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        ack,
        json!({"received": true, "processed": false, "reason": "order_not_found"})
    );
}

// =============================================================================
// Seller settings
// =============================================================================

#[tokio::test]
async fn test_settings_save_masks_secrets() {
    let h = Harness::new();
    let uri = format!("/stores/{SELLER_STORE}/fulfillment-settings");
    let api_key = "a1b2c3d4-e5f6-7890-abcd-ef1234567890-fedcba987654";

    let (status, body) = send(
        app(&h),
        json_request(
            Method::PUT,
            &uri,
            &json!({
                "apiKey": api_key,
                "providerStoreId": "prov_1",
                "webhookSecret": "whsec_seller",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["verified"], true);

    let (status, body) = send(app(&h), empty_request(Method::GET, &uri)).await;
    assert_eq!(status, StatusCode::OK);
    let rendered = body.to_string();
    assert!(!rendered.contains(api_key));
    assert!(!rendered.contains("whsec_seller"));
    assert_eq!(body["data"]["configured"], true);
    let webhook_url = body["data"]["webhookUrl"].as_str().unwrap();
    assert!(webhook_url.starts_with("https://pod.example.com/webhooks/provider/"));

    let (status, body) = send(
        app(&h),
        json_request(Method::POST, &format!("{uri}/enabled"), &json!({"enabled": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], true);

    let (status, _) = send(app(&h), empty_request(Method::DELETE, &uri)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(app(&h), empty_request(Method::DELETE, &uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_platform_status() {
    let h = Harness::new();

    let (status, body) = send(app(&h), empty_request(Method::GET, "/fulfillment/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["configured"], true);
    assert_eq!(body["data"]["reachable"], true);
}
