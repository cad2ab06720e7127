//! Read-only catalog, shipping, and pricing queries.

use std::sync::Arc;

use podbridge_core::StoreId;
use serde::Serialize;
use tracing::{instrument, warn};

use super::credential_resolver::CredentialResolver;
use crate::db::SettingsRepository;
use crate::db::settings::{POD_ENABLED, bool_setting};
use crate::error::AppError;
use crate::provider::{
    CatalogProduct, FulfillmentProvider, ProductList, ProductQuery, Quote, QuoteRequest,
    ShippingMethod, ShippingMethodsRequest,
};

/// Default quote currency.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Platform account health, as reported by the status probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    pub configured: bool,
    pub enabled: bool,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Catalog browsing through the provider.
///
/// A store id selects that store's credential; `None` uses the platform account.
#[derive(Clone)]
pub struct CatalogBrowser {
    provider: Arc<dyn FulfillmentProvider>,
    resolver: CredentialResolver,
    settings: Arc<dyn SettingsRepository>,
}

impl CatalogBrowser {
    #[must_use]
    pub fn new(
        provider: Arc<dyn FulfillmentProvider>,
        resolver: CredentialResolver,
        settings: Arc<dyn SettingsRepository>,
    ) -> Self {
        Self {
            provider,
            resolver,
            settings,
        }
    }

    /// # Errors
    ///
    /// Returns an error if no credential is available or the provider call fails.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        store_id: Option<&StoreId>,
        query: &ProductQuery,
    ) -> Result<ProductList, AppError> {
        Ok(self.provider.list_products(store_id, query).await?)
    }

    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown product uid.
    #[instrument(skip(self))]
    pub async fn get_product(
        &self,
        store_id: Option<&StoreId>,
        product_uid: &str,
    ) -> Result<CatalogProduct, AppError> {
        if product_uid.trim().is_empty() {
            return Err(AppError::Validation("productUid is required".to_string()));
        }
        Ok(self.provider.get_product(store_id, product_uid).await?)
    }

    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if the product uid or country is blank.
    #[instrument(skip(self))]
    pub async fn shipping_methods(
        &self,
        store_id: Option<&StoreId>,
        request: &ShippingMethodsRequest,
    ) -> Result<Vec<ShippingMethod>, AppError> {
        if request.product_uid.trim().is_empty() || request.country.trim().is_empty() {
            return Err(AppError::Validation(
                "productUid and country are required".to_string(),
            ));
        }
        Ok(self.provider.shipping_methods(store_id, request).await?)
    }

    /// Price quote; the currency defaults to USD.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if there are no items or no country.
    #[instrument(skip(self, request))]
    pub async fn quote(
        &self,
        store_id: Option<&StoreId>,
        request: QuoteRequest,
    ) -> Result<Quote, AppError> {
        if request.items.is_empty() {
            return Err(AppError::Validation("At least one item is required".to_string()));
        }
        if request.country.trim().is_empty() {
            return Err(AppError::Validation("country is required".to_string()));
        }

        let request = QuoteRequest {
            currency: Some(request.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string())),
            ..request
        };
        Ok(self.provider.quote(store_id, &request).await?)
    }

    /// Probe the platform account: configured, enabled by setting, reachable.
    ///
    /// # Errors
    ///
    /// Returns an error only if the settings store fails.
    #[instrument(skip(self))]
    pub async fn platform_status(&self) -> Result<PlatformStatus, AppError> {
        let enabled = bool_setting(self.settings.as_ref(), POD_ENABLED, false).await?;

        let Ok(credential) = self.resolver.platform() else {
            return Ok(PlatformStatus {
                configured: false,
                enabled,
                reachable: false,
                error: None,
            });
        };

        let (reachable, error) = match self.provider.verify_credentials(&credential).await {
            Ok(()) => (true, None),
            Err(e) => {
                warn!(error = %e, "Platform account probe failed");
                (false, Some(e.to_string()))
            }
        };

        Ok(PlatformStatus {
            configured: true,
            enabled,
            reachable,
            error,
        })
    }
}
