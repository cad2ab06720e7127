//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                                    - Liveness
//! GET  /health/ready                              - Database readiness
//!
//! # Provider webhooks
//! POST /webhooks/provider                         - Platform-signed deliveries
//! POST /webhooks/provider/{store_key}             - Tenant-signed deliveries
//!
//! # Fulfillment orders
//! GET  /fulfillment/status                        - Platform account probe
//! GET  /fulfillment/orders                        - List (status, orderId, limit, offset)
//! POST /fulfillment/orders                        - Submit one line
//! POST /fulfillment/orders/batch                  - Submit every POD line of an order
//! GET  /fulfillment/orders/{id}                   - Detail with recent events
//! POST /fulfillment/orders/{id}/cancel            - Cancel
//! POST /fulfillment/orders/{id}/sync              - Re-read the provider status
//!
//! # Seller settings
//! GET|PUT|DELETE /stores/{store_id}/fulfillment-settings
//! POST /stores/{store_id}/fulfillment-settings/enabled
//! POST /stores/{store_id}/fulfillment-settings/test
//!
//! # Catalog
//! GET  /catalog/products
//! GET  /catalog/products/{product_uid}
//! POST /catalog/shipping-methods
//! POST /catalog/quote
//! ```
//!
//! Administrative responses use the `{success, data}` envelope; errors are
//! rendered by [`AppError`](crate::error::AppError) as `{success: false, error}`.

pub mod catalog;
pub mod fulfillment;
pub mod health;
pub mod settings;
pub mod webhooks;

use axum::{Json, Router, http::StatusCode, response::IntoResponse, response::Response};
use serde::Serialize;

use crate::state::AppState;

/// Build the complete router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(webhooks::router())
        .merge(fulfillment::router())
        .merge(settings::router())
        .merge(catalog::router())
}

/// Success envelope for administrative endpoints.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip)]
    status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            status: StatusCode::OK,
        }
    }

    pub const fn created(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            status: StatusCode::CREATED,
        }
    }
}

impl ApiResponse<()> {
    /// Success without a payload.
    pub const fn empty() -> Self {
        Self {
            success: true,
            data: None,
            status: StatusCode::OK,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::services::webhooks::{SIGNATURE_HEADER, sign};
    use crate::testing::{EventStoreFault, Harness, PLATFORM_WEBHOOK_SECRET, webhook_body};
    use secrecy::SecretString;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn call(h: &Harness, request: Request<Body>) -> (StatusCode, Value) {
        let app = routes().with_state(AppState::in_memory(h.services.clone()));
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[test]
    fn test_envelope_shapes() {
        let body = serde_json::to_value(ApiResponse::ok(json!({"id": "fo_1"}))).unwrap();
        assert_eq!(body, json!({"success": true, "data": {"id": "fo_1"}}));

        let body = serde_json::to_value(ApiResponse::<()>::empty()).unwrap();
        assert_eq!(body, json!({"success": true}));
        assert_eq!(ApiResponse::created(1).into_response().status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_bad_webhook_signature_is_401() {
        let h = Harness::new();
        let body = webhook_body("evt_1", "order:shipped", "ext_1", json!({}));
        let request = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/provider")
            .header("X-Webhook-Signature", "sha256=00ff")
            .body(Body::from(body))
            .unwrap();

        let (status, body) = call(&h, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    fn signed_webhook(uri: &str, body: Vec<u8>) -> Request<Body> {
        let signature = sign(&SecretString::from(PLATFORM_WEBHOOK_SECRET), &body);
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_event_store_outage_is_still_acknowledged() {
        let h = Harness::builder().event_store_fault(EventStoreFault::Claim).build();
        let body = webhook_body("evt_1", "order:shipped", "ext_1", json!({}));

        let (status, body) = call(&h, signed_webhook("/webhooks/provider", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"received": true, "processed": false, "reason": "processing_failed"})
        );
    }

    #[tokio::test]
    async fn test_failed_transition_reports_reason() {
        let h = Harness::builder()
            .event_store_fault(EventStoreFault::AttachAndMarkFailed)
            .build();
        let fo = h.submitted_lines("ord_1", 1).await.remove(0);
        let external = fo.external_order_id.unwrap();
        let body = webhook_body("evt_1", "order:shipped", &external, json!({}));

        let (status, body) = call(&h, signed_webhook("/webhooks/provider", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["processed"], false);
        assert_eq!(body["reason"], "processing_failed");
    }

    #[tokio::test]
    async fn test_undecodable_store_key_is_401() {
        let h = Harness::new();
        let body = webhook_body("evt_1", "order:shipped", "ext_1", json!({}));

        let (status, _) = call(&h, signed_webhook("/webhooks/provider/not*a*key", body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cancel_accepts_optional_reason() {
        let h = Harness::new();
        let fo = h.submitted_lines("ord_1", 1).await.remove(0);
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/fulfillment/orders/{}/cancel", fo.id))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"reason":"Buyer changed their mind"}"#))
            .unwrap();

        let (status, body) = call(&h, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "CANCELLED");
        assert_eq!(body["data"]["failureReason"], "Buyer changed their mind");
    }

    #[tokio::test]
    async fn test_malformed_cancel_body_is_400() {
        let h = Harness::new();
        let fo = h.submitted_lines("ord_1", 1).await.remove(0);
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/fulfillment/orders/{}/cancel", fo.id))
            .body(Body::from("{not json"))
            .unwrap();

        let (status, _) = call(&h, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
