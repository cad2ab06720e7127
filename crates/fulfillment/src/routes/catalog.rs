//! Catalog browsing endpoints.
//!
//! Every endpoint takes an optional `storeId` query parameter selecting the
//! seller's credential; without it the platform account is used.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use podbridge_core::StoreId;
use serde::Deserialize;
use tracing::instrument;

use super::ApiResponse;
use crate::error::AppError;
use crate::provider::{
    CatalogProduct, ProductList, ProductQuery, Quote, QuoteRequest, ShippingMethod,
    ShippingMethodsRequest,
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/catalog/products", get(list_products))
        .route("/catalog/products/{product_uid}", get(get_product))
        .route("/catalog/shipping-methods", post(shipping_methods))
        .route("/catalog/quote", post(quote))
}

/// Whose credential to browse with.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreScope {
    #[serde(default)]
    pub store_id: Option<StoreId>,
}

#[instrument(skip(state))]
async fn list_products(
    State(state): State<AppState>,
    Query(scope): Query<StoreScope>,
    Query(query): Query<ProductQuery>,
) -> Result<ApiResponse<ProductList>, AppError> {
    Ok(ApiResponse::ok(
        state
            .services()
            .catalog
            .list_products(scope.store_id.as_ref(), &query)
            .await?,
    ))
}

#[instrument(skip(state))]
async fn get_product(
    State(state): State<AppState>,
    Path(product_uid): Path<String>,
    Query(scope): Query<StoreScope>,
) -> Result<ApiResponse<CatalogProduct>, AppError> {
    Ok(ApiResponse::ok(
        state
            .services()
            .catalog
            .get_product(scope.store_id.as_ref(), &product_uid)
            .await?,
    ))
}

#[instrument(skip(state))]
async fn shipping_methods(
    State(state): State<AppState>,
    Query(scope): Query<StoreScope>,
    Json(request): Json<ShippingMethodsRequest>,
) -> Result<ApiResponse<Vec<ShippingMethod>>, AppError> {
    Ok(ApiResponse::ok(
        state
            .services()
            .catalog
            .shipping_methods(scope.store_id.as_ref(), &request)
            .await?,
    ))
}

#[instrument(skip(state, request))]
async fn quote(
    State(state): State<AppState>,
    Query(scope): Query<StoreScope>,
    Json(request): Json<QuoteRequest>,
) -> Result<ApiResponse<Quote>, AppError> {
    Ok(ApiResponse::ok(
        state
            .services()
            .catalog
            .quote(scope.store_id.as_ref(), request)
            .await?,
    ))
}
