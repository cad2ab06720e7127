//! Provider REST API client.
//!
//! Thin request layer: resolves the credential for the tenant, attaches the
//! `X-API-KEY` header, and maps failures onto [`ProviderError`]. Two base URLs
//! are used, one for the order API and one for the product catalog.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use podbridge_core::StoreId;
use reqwest::{Method, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::instrument;

use super::{
    CatalogProduct, CreateOrderRequest, CreatedOrder, CredentialProvider, FulfillmentProvider,
    ProductList, ProductQuery, ProviderCredential, ProviderError, ProviderOrder, Quote,
    QuoteRequest, ShippingMethod, ShippingMethodsRequest,
};

/// Retry delay assumed when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
/// Longest upstream error text carried into [`ProviderError`].
const MAX_ERROR_MESSAGE_LEN: usize = 300;

/// Connection settings for [`ProviderClient`].
#[derive(Debug, Clone)]
pub struct ProviderClientConfig {
    /// Order API base URL, e.g. `https://order.gelatoapis.com/v4`.
    pub order_api_url: String,
    /// Catalog API base URL, e.g. `https://product.gelatoapis.com/v3`.
    pub catalog_api_url: String,
    pub timeout: Duration,
}

/// Provider API client.
#[derive(Clone)]
pub struct ProviderClient {
    inner: Arc<ProviderClientInner>,
}

struct ProviderClientInner {
    http: reqwest::Client,
    order_api_url: String,
    catalog_api_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

#[derive(Clone, Copy)]
enum Api {
    Order,
    Catalog,
}

impl ProviderClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Http` if the HTTP client cannot be built.
    pub fn new(
        config: &ProviderClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(10)))
            .build()?;

        Ok(Self {
            inner: Arc::new(ProviderClientInner {
                http,
                order_api_url: config.order_api_url.trim_end_matches('/').to_string(),
                catalog_api_url: config.catalog_api_url.trim_end_matches('/').to_string(),
                credentials,
            }),
        })
    }

    fn url(&self, api: Api, path: &str) -> String {
        let base = match api {
            Api::Order => &self.inner.order_api_url,
            Api::Catalog => &self.inner.catalog_api_url,
        };
        format!("{base}{path}")
    }

    /// Send a request and return the raw body of a 2xx response.
    async fn execute(
        &self,
        credential: &ProviderCredential,
        method: Method,
        url: String,
        body: Option<&JsonValue>,
        query: &[(&'static str, String)],
    ) -> Result<String, ProviderError> {
        tracing::debug!(method = %method, url = %url, "Provider API request");

        let mut request = self
            .inner
            .http
            .request(method, url)
            .header("X-API-KEY", credential.api_key.expose_secret())
            .header("Accept", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        if response.status().is_success() {
            return response.text().await.map_err(classify_transport_error);
        }
        Err(error_from_response(response).await)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        credential: &ProviderCredential,
        method: Method,
        url: String,
        body: Option<&JsonValue>,
        query: &[(&'static str, String)],
    ) -> Result<T, ProviderError> {
        let text = self.execute(credential, method, url, body, query).await?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        Ok(serde_json::from_str(text)?)
    }

    async fn credential(
        &self,
        store_id: Option<&StoreId>,
    ) -> Result<ProviderCredential, ProviderError> {
        self.inner.credentials.credential_for(store_id).await
    }
}

/// Map a transport failure to the error the callers act on.
fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else if err.is_connect() {
        ProviderError::Unavailable(format!("Failed to communicate with provider API: {err}"))
    } else if err.is_decode() || err.is_body() {
        ProviderError::Unavailable(format!("Failed to read provider response: {err}"))
    } else {
        ProviderError::Http(err)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<JsonValue>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Pull a human-readable message out of a provider error body.
fn extract_error_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<ErrorBody>(body).ok().and_then(|parsed| {
        parsed
            .message
            .or_else(|| match parsed.error {
                Some(JsonValue::String(s)) => Some(s),
                Some(JsonValue::Object(obj)) => obj
                    .get("message")
                    .and_then(JsonValue::as_str)
                    .map(str::to_owned),
                _ => None,
            })
            .or_else(|| parsed.errors.into_iter().find_map(|e| e.message))
    });

    let message = from_json.unwrap_or_else(|| body.trim().to_string());
    if message.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("Provider API error")
            .to_string();
    }
    message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return ProviderError::RateLimited(retry_after);
    }

    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(status, &body);
    tracing::warn!(status = status.as_u16(), message = %message, "Provider API error");

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(message),
        StatusCode::NOT_FOUND => ProviderError::NotFound(message),
        s if s.is_server_error() => {
            ProviderError::Unavailable(format!("provider returned {}: {message}", s.as_u16()))
        }
        s => ProviderError::Upstream {
            status: s.as_u16(),
            message,
        },
    }
}

#[derive(Deserialize)]
struct ShippingMethodsResponse {
    #[serde(default, rename = "shippingMethods")]
    shipping_methods: Vec<ShippingMethod>,
}

#[async_trait]
impl FulfillmentProvider for ProviderClient {
    #[instrument(
        skip(self, request),
        fields(store_id = %store_id, reference = %request.order_reference_id)
    )]
    async fn create_order(
        &self,
        store_id: &StoreId,
        request: &CreateOrderRequest,
    ) -> Result<CreatedOrder, ProviderError> {
        let credential = self.credential(Some(store_id)).await?;

        let mut body = serde_json::to_value(request)?;
        if let JsonValue::Object(map) = &mut body {
            map.insert(
                "storeId".to_string(),
                JsonValue::String(credential.provider_store_id.clone()),
            );
        }

        let order: ProviderOrder = self
            .call(&credential, Method::POST, self.url(Api::Order, "/orders"), Some(&body), &[])
            .await?;

        if credential.is_platform_fallback() {
            tracing::warn!(
                store_id = %store_id,
                "Order submitted using platform account (seller has not configured their own)"
            );
        }

        Ok(CreatedOrder {
            order,
            used_platform_account: credential.is_platform_fallback(),
        })
    }

    #[instrument(skip(self), fields(store_id = %store_id))]
    async fn get_order(
        &self,
        store_id: &StoreId,
        external_order_id: &str,
    ) -> Result<ProviderOrder, ProviderError> {
        let credential = self.credential(Some(store_id)).await?;
        let url = self.url(Api::Order, &format!("/orders/{external_order_id}"));
        self.call(&credential, Method::GET, url, None, &[]).await
    }

    #[instrument(skip(self), fields(store_id = %store_id))]
    async fn cancel_order(
        &self,
        store_id: &StoreId,
        external_order_id: &str,
    ) -> Result<(), ProviderError> {
        let credential = self.credential(Some(store_id)).await?;
        let url = self.url(Api::Order, &format!("/orders/{external_order_id}/cancel"));
        self.execute(&credential, Method::POST, url, None, &[]).await?;
        Ok(())
    }

    #[instrument(skip(self, query))]
    async fn list_products(
        &self,
        store_id: Option<&StoreId>,
        query: &ProductQuery,
    ) -> Result<ProductList, ProviderError> {
        let credential = self.credential(store_id).await?;
        let url = self.url(Api::Catalog, "/catalogs/products");
        self.call(&credential, Method::GET, url, None, &query.to_pairs()).await
    }

    #[instrument(skip(self))]
    async fn get_product(
        &self,
        store_id: Option<&StoreId>,
        product_uid: &str,
    ) -> Result<CatalogProduct, ProviderError> {
        let credential = self.credential(store_id).await?;
        let url = self.url(Api::Catalog, &format!("/catalogs/products/{product_uid}"));
        self.call(&credential, Method::GET, url, None, &[]).await
    }

    #[instrument(skip(self, request))]
    async fn shipping_methods(
        &self,
        store_id: Option<&StoreId>,
        request: &ShippingMethodsRequest,
    ) -> Result<Vec<ShippingMethod>, ProviderError> {
        let credential = self.credential(store_id).await?;
        let body = json!({
            "storeId": credential.provider_store_id,
            "items": [{ "productUid": request.product_uid, "quantity": request.quantity }],
            "shippingAddress": { "country": request.country, "state": request.state },
        });
        let response: ShippingMethodsResponse = self
            .call(
                &credential,
                Method::POST,
                self.url(Api::Order, "/shipping/methods"),
                Some(&body),
                &[],
            )
            .await?;
        Ok(response.shipping_methods)
    }

    #[instrument(skip(self, request))]
    async fn quote(
        &self,
        store_id: Option<&StoreId>,
        request: &QuoteRequest,
    ) -> Result<Quote, ProviderError> {
        let credential = self.credential(store_id).await?;
        let body = json!({
            "storeId": credential.provider_store_id,
            "currency": request.currency.as_deref().unwrap_or("USD"),
            "items": request.items,
            "shippingAddress": { "country": request.country },
            "shipmentMethodUid": request.shipping_method_uid,
        });
        self.call(
            &credential,
            Method::POST,
            self.url(Api::Order, "/orders/quote"),
            Some(&body),
            &[],
        )
        .await
    }

    #[instrument(skip(self, credential), fields(api_key = %credential.masked_key()))]
    async fn verify_credentials(
        &self,
        credential: &ProviderCredential,
    ) -> Result<(), ProviderError> {
        let url = self.url(Api::Catalog, "/catalogs");
        self.execute(credential, Method::GET, url, None, &[]).await?;
        Ok(())
    }
}
