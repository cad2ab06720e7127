//! Seller fulfillment settings endpoints.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use podbridge_core::StoreId;
use serde::Deserialize;
use tracing::instrument;

use super::ApiResponse;
use crate::error::AppError;
use crate::services::{ConnectionTestResult, SaveSettingsRequest, SellerSettingsView};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/stores/{store_id}/fulfillment-settings",
            get(show).put(save).delete(remove),
        )
        .route("/stores/{store_id}/fulfillment-settings/enabled", post(set_enabled))
        .route("/stores/{store_id}/fulfillment-settings/test", post(test_connection))
}

#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

async fn show(
    State(state): State<AppState>,
    Path(store_id): Path<StoreId>,
) -> Result<ApiResponse<SellerSettingsView>, AppError> {
    Ok(ApiResponse::ok(state.services().settings.get(&store_id).await?))
}

#[instrument(skip(state, request))]
async fn save(
    State(state): State<AppState>,
    Path(store_id): Path<StoreId>,
    Json(request): Json<SaveSettingsRequest>,
) -> Result<ApiResponse<SellerSettingsView>, AppError> {
    Ok(ApiResponse::ok(
        state.services().settings.upsert(&store_id, request).await?,
    ))
}

#[instrument(skip(state))]
async fn remove(
    State(state): State<AppState>,
    Path(store_id): Path<StoreId>,
) -> Result<ApiResponse<()>, AppError> {
    state.services().settings.delete(&store_id).await?;
    Ok(ApiResponse::empty())
}

#[instrument(skip(state))]
async fn set_enabled(
    State(state): State<AppState>,
    Path(store_id): Path<StoreId>,
    Json(request): Json<EnabledRequest>,
) -> Result<ApiResponse<SellerSettingsView>, AppError> {
    Ok(ApiResponse::ok(
        state
            .services()
            .settings
            .set_enabled(&store_id, request.enabled)
            .await?,
    ))
}

#[instrument(skip(state))]
async fn test_connection(
    State(state): State<AppState>,
    Path(store_id): Path<StoreId>,
) -> Result<ApiResponse<ConnectionTestResult>, AppError> {
    Ok(ApiResponse::ok(state.services().settings.test(&store_id).await?))
}
