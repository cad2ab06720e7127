//! Fulfillment order endpoints.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    routing::{get, post},
};
use podbridge_core::{FulfillmentOrderId, OrderId};
use serde::Deserialize;
use tracing::instrument;

use super::ApiResponse;
use crate::error::AppError;
use crate::models::{FulfillmentFilter, FulfillmentOrder};
use crate::services::{
    BatchSubmission, FulfillmentOrderDetail, PlatformStatus, SubmitRequest, TransitionResult,
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/fulfillment/status", get(platform_status))
        .route("/fulfillment/orders", get(list).post(submit))
        .route("/fulfillment/orders/batch", post(submit_all))
        .route("/fulfillment/orders/{id}", get(show))
        .route("/fulfillment/orders/{id}/cancel", post(cancel))
        .route("/fulfillment/orders/{id}/sync", post(sync))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub order_id: OrderId,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

async fn platform_status(
    State(state): State<AppState>,
) -> Result<ApiResponse<PlatformStatus>, AppError> {
    Ok(ApiResponse::ok(state.services().catalog.platform_status().await?))
}

#[instrument(skip(state))]
async fn list(
    State(state): State<AppState>,
    Query(filter): Query<FulfillmentFilter>,
) -> Result<ApiResponse<Vec<FulfillmentOrder>>, AppError> {
    Ok(ApiResponse::ok(state.services().submission.list(filter).await?))
}

#[instrument(skip(state))]
async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<ApiResponse<FulfillmentOrder>, AppError> {
    let submitted = state.services().submission.submit(request).await?;
    Ok(ApiResponse::created(submitted))
}

#[instrument(skip(state))]
async fn submit_all(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<ApiResponse<BatchSubmission>, AppError> {
    Ok(ApiResponse::ok(
        state.services().submission.submit_all(&request.order_id).await?,
    ))
}

async fn show(
    State(state): State<AppState>,
    Path(id): Path<FulfillmentOrderId>,
) -> Result<ApiResponse<FulfillmentOrderDetail>, AppError> {
    Ok(ApiResponse::ok(state.services().submission.get(&id).await?))
}

/// Cancel a fulfillment order. The body is optional.
#[instrument(skip(state, body))]
async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<FulfillmentOrderId>,
    body: Bytes,
) -> Result<ApiResponse<FulfillmentOrder>, AppError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CancelRequest::default()
    } else {
        serde_json::from_slice::<CancelRequest>(&body)
            .map_err(|e| AppError::Validation(format!("Invalid cancel request: {e}")))?
    };
    let reason = request.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());

    Ok(ApiResponse::ok(
        state.services().submission.cancel(&id, reason).await?,
    ))
}

#[instrument(skip(state))]
async fn sync(
    State(state): State<AppState>,
    Path(id): Path<FulfillmentOrderId>,
) -> Result<ApiResponse<TransitionResult>, AppError> {
    Ok(ApiResponse::ok(state.services().machine.sync(&id).await?))
}
