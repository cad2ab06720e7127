//! Provider webhook endpoints.
//!
//! Deliveries are always acknowledged with `200`, even when processing or
//! the event store fails, so the provider does not retry indefinitely. Only
//! signature failures answer `401`.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
};
use serde::Serialize;
use tracing::{error, instrument};

use crate::error::AppError;
use crate::services::webhooks::{SIGNATURE_HEADER, SkipReason, WebhookOutcome};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/provider", post(platform_webhook))
        .route("/webhooks/provider/{store_key}", post(store_webhook))
}

/// Acknowledgement body.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
}

impl From<WebhookOutcome> for WebhookAck {
    fn from(outcome: WebhookOutcome) -> Self {
        Self {
            received: true,
            processed: outcome.processed,
            reason: outcome.reason,
        }
    }
}

#[instrument(skip(state, headers, body), fields(body_len = body.len()))]
async fn platform_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    ingest(&state, None, &headers, &body).await
}

#[instrument(skip(state, headers, body), fields(body_len = body.len()))]
async fn store_webhook(
    State(state): State<AppState>,
    Path(store_key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    ingest(&state, Some(&store_key), &headers, &body).await
}

async fn ingest(
    state: &AppState,
    store_key: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    match state.services().webhooks.handle(store_key, signature, body).await {
        Ok(outcome) => Ok(Json(outcome.into())),
        Err(e @ AppError::Unauthorized(_)) => Err(e),
        Err(e) => {
            // Acknowledge anyway; missed transitions are recovered by sync.
            error!(error = %e, "Webhook not processed");
            Ok(Json(WebhookOutcome::skipped(SkipReason::ProcessingFailed).into()))
        }
    }
}
