//! Order submission to the print-on-demand provider.
//!
//! # Duplicate protection
//!
//! A line is reserved with a `PENDING` record before the provider is called.
//! The active-line unique index makes the reservation atomic, so two
//! concurrent submissions of the same line cannot both reach the provider.
//!
//! | Provider outcome                       | Reservation             |
//! |----------------------------------------|-------------------------|
//! | created                                | promoted to `SUBMITTED` |
//! | rejected (4xx, auth, no credentials)   | marked `FAILED`         |
//! | unknown (timeout, 5xx, bad 2xx body)   | kept `PENDING`          |
//!
//! An unknown outcome keeps the slot because the remote order may exist.
//!
//! A `PENDING` reservation can only be released by an operator cancel once it
//! is older than the reservation grace, which outlasts any provider call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use podbridge_core::{
    FulfillmentOrderId, FulfillmentStatus, FulfillmentType, OrderId, OrderItemId, ProductId,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use super::credential_resolver::CredentialResolver;
use super::state_machine::{ProviderStatus, StatusMachine, TransitionResult};
use crate::db::fulfillment_orders::ALREADY_SUBMITTED;
use crate::db::settings::{POD_DEFAULT_SHIPPING_METHOD, string_setting};
use crate::db::{
    CredentialRepository, FulfillmentRepository, OrderRepository, Repositories, SettingsRepository,
    WebhookEventRepository,
};
use crate::error::AppError;
use crate::models::{
    FulfillmentFilter, FulfillmentOrder, NewFulfillmentOrder, OrderLine, WebhookEvent,
};
use crate::provider::{
    CreateOrderRequest, FulfillmentProvider, MetadataEntry, OrderItemRequest, PrintFile,
    ProviderAddress, ProviderError, ProviderOrder,
};

/// Shipping method used when neither the request nor settings name one.
pub const DEFAULT_SHIPPING_METHOD: &str = "standard";
/// Currency used when the order has none.
pub const DEFAULT_CURRENCY: &str = "USD";
/// Print file type sent with every line.
const PRINT_FILE_TYPE: &str = "default";
/// Webhook events included in a detail view.
const RECENT_EVENTS: i64 = 10;
/// Age before a `PENDING` reservation may be released when none is configured.
pub const DEFAULT_RESERVATION_GRACE: Duration = Duration::from_secs(120);
const DEFAULT_OPERATOR_CANCEL_REASON: &str = "Cancelled by operator";

/// Request to submit one order line.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    #[serde(default)]
    pub shipping_method: Option<String>,
}

/// Outcome of one line in a batch submission.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LineResult {
    Submitted { fulfillment_order: Box<FulfillmentOrder> },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineOutcome {
    pub order_item_id: OrderItemId,
    pub product_id: ProductId,
    #[serde(flatten)]
    pub result: LineResult,
}

/// Per-line results of [`SubmissionPipeline::submit_all`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmission {
    pub order_id: OrderId,
    pub submitted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub lines: Vec<LineOutcome>,
}

impl BatchSubmission {
    fn new(order_id: OrderId, lines: Vec<LineOutcome>) -> Self {
        let count =
            |pred: fn(&LineResult) -> bool| lines.iter().filter(|l| pred(&l.result)).count();
        Self {
            submitted: count(|r| matches!(r, LineResult::Submitted { .. })),
            skipped: count(|r| matches!(r, LineResult::Skipped { .. })),
            failed: count(|r| matches!(r, LineResult::Failed { .. })),
            order_id,
            lines,
        }
    }
}

/// A fulfillment order with its recent events and live provider state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentOrderDetail {
    pub fulfillment_order: FulfillmentOrder,
    pub events: Vec<WebhookEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_status: Option<ProviderOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_status_error: Option<String>,
}

/// Checks eligibility, then builds the provider order for a line.
///
/// # Errors
///
/// Returns [`AppError::Validation`] naming the first missing piece of configuration.
pub fn build_order_request(
    line: &OrderLine,
    shipping_method: &str,
) -> Result<CreateOrderRequest, AppError> {
    let OrderLine { order, item, product } = line;

    if product.fulfillment_type != FulfillmentType::Pod {
        return Err(AppError::Validation(format!(
            "Product {} is not a print-on-demand product",
            product.id
        )));
    }
    let product_uid = product
        .provider_product_uid
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            AppError::Validation(format!("Product {} is missing providerProductUid", product.id))
        })?;
    let design_file_url = product
        .design_file_url
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            AppError::Validation(format!("Product {} is missing designFileUrl", product.id))
        })?;
    let address = order.shipping_address.as_ref().ok_or_else(|| {
        AppError::Validation(format!("Order {} has no shipping address", order.id))
    })?;

    let reference = format!("{}-{}", order.id, item.id);
    Ok(CreateOrderRequest {
        order_reference_id: reference,
        customer_reference_id: order.customer_id.to_string(),
        currency: order.currency.clone().unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        items: vec![OrderItemRequest {
            item_reference_id: item.id.to_string(),
            product_uid: product_uid.to_owned(),
            quantity: item.quantity,
            files: vec![PrintFile {
                kind: PRINT_FILE_TYPE.to_string(),
                url: design_file_url.to_owned(),
            }],
        }],
        shipment_method_uid: Some(shipping_method.to_owned()),
        shipping_address: ProviderAddress {
            first_name: address.first_name.clone(),
            last_name: address.last_name.clone(),
            company_name: address.company.clone(),
            address_line1: address.address_line1.clone(),
            address_line2: address.address_line2.clone(),
            city: address.city.clone(),
            state: address.state.clone(),
            post_code: address.post_code.clone(),
            country: address.country.clone(),
            email: order.customer_email.clone(),
            phone: address.phone.clone(),
        },
        metadata: vec![
            MetadataEntry {
                key: "orderId".to_string(),
                value: order.id.to_string(),
            },
            MetadataEntry {
                key: "orderItemId".to_string(),
                value: item.id.to_string(),
            },
        ],
    })
}

/// Submits order lines and manages their fulfillment records.
#[derive(Clone)]
pub struct SubmissionPipeline {
    orders: Arc<dyn OrderRepository>,
    fulfillment: Arc<dyn FulfillmentRepository>,
    webhook_events: Arc<dyn WebhookEventRepository>,
    settings: Arc<dyn SettingsRepository>,
    credentials: Arc<dyn CredentialRepository>,
    provider: Arc<dyn FulfillmentProvider>,
    resolver: CredentialResolver,
    machine: StatusMachine,
    reservation_grace: Duration,
}

impl SubmissionPipeline {
    #[must_use]
    pub fn new(
        repos: &Repositories,
        provider: Arc<dyn FulfillmentProvider>,
        resolver: CredentialResolver,
        machine: StatusMachine,
    ) -> Self {
        Self {
            orders: repos.orders.clone(),
            fulfillment: repos.fulfillment.clone(),
            webhook_events: repos.webhook_events.clone(),
            settings: repos.settings.clone(),
            credentials: repos.credentials.clone(),
            provider,
            resolver,
            machine,
            reservation_grace: DEFAULT_RESERVATION_GRACE,
        }
    }

    /// How old a `PENDING` reservation must be before a cancel may release it.
    /// Must exceed the provider call timeout.
    #[must_use]
    pub const fn with_reservation_grace(mut self, grace: Duration) -> Self {
        self.reservation_grace = grace;
        self
    }

    /// Submit one order line to the provider.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] if the line does not exist
    /// - [`AppError::Validation`] if the product is not POD or lacks configuration
    /// - [`AppError::Conflict`] if the line was already submitted
    /// - [`AppError::ServiceUnavailable`] if no credential is available or the
    ///   provider outcome is unknown (the reservation stays `PENDING`)
    /// - [`AppError::Upstream`] if the provider rejects the order
    /// - [`AppError::Internal`] if the remote order exists but could not be recorded
    #[instrument(
        skip(self, request),
        fields(order_id = %request.order_id, order_item_id = %request.order_item_id)
    )]
    pub async fn submit(&self, request: SubmitRequest) -> Result<FulfillmentOrder, AppError> {
        let line = self
            .orders
            .order_line(&request.order_id, &request.order_item_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Order item {} not found in order {}",
                    request.order_item_id, request.order_id
                ))
            })?;
        self.submit_line(&line, request.shipping_method).await
    }

    async fn submit_line(
        &self,
        line: &OrderLine,
        shipping_method: Option<String>,
    ) -> Result<FulfillmentOrder, AppError> {
        let shipping_method = match shipping_method.filter(|s| !s.trim().is_empty()) {
            Some(method) => method,
            None => {
                string_setting(
                    self.settings.as_ref(),
                    POD_DEFAULT_SHIPPING_METHOD,
                    DEFAULT_SHIPPING_METHOD,
                )
                .await?
            }
        };
        let payload = build_order_request(line, &shipping_method)?;
        let store_id = line.product.store_id.clone().ok_or_else(|| {
            AppError::Validation(format!("Product {} is not assigned to a store", line.product.id))
        })?;

        if self
            .fulfillment
            .find_active_for_line(&line.order.id, &line.item.id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(ALREADY_SUBMITTED.to_string()));
        }

        let credential = self.resolver.resolve(&store_id).await?;

        let reservation = self
            .fulfillment
            .reserve(&NewFulfillmentOrder {
                id: FulfillmentOrderId::generate(),
                order_id: line.order.id.clone(),
                order_item_id: line.item.id.clone(),
                product_id: line.product.id.clone(),
                store_id: store_id.clone(),
                external_reference: payload.order_reference_id.clone(),
                shipping_method,
                currency: payload.currency.clone(),
                used_platform_account: credential.is_platform_fallback(),
            })
            .await?;

        let reservation_id = reservation.id.clone();
        let created = match self.provider.create_order(&store_id, &payload).await {
            Ok(created) => created,
            Err(e) if e.is_rejection() => {
                warn!(
                    fulfillment_order_id = %reservation_id,
                    error = %e,
                    "Provider rejected order"
                );
                self.release_rejected(reservation, &e).await;
                return Err(e.into());
            }
            Err(e) => {
                warn!(
                    fulfillment_order_id = %reservation_id,
                    error = %e,
                    "Provider outcome unknown, keeping PENDING reservation"
                );
                return Err(AppError::ServiceUnavailable(format!(
                    "{e}; the order may still have been created"
                )));
            }
        };

        let submitted = self
            .fulfillment
            .mark_submitted(
                &reservation_id,
                &created.order.id,
                created.order.fulfillment_status.as_deref(),
                Utc::now(),
            )
            .await
            .map_err(|e| {
                error!(
                    fulfillment_order_id = %reservation_id,
                    external_order_id = %created.order.id,
                    error = %e,
                    "Provider order created but local promotion failed"
                );
                AppError::Internal(format!(
                    "Provider order {} was created but fulfillment order {reservation_id} \
                     could not record it",
                    created.order.id
                ))
            })?;

        info!(
            fulfillment_order_id = %submitted.id,
            external_order_id = %created.order.id,
            platform_fallback = created.used_platform_account,
            "Order line submitted to provider"
        );
        Ok(submitted)
    }

    /// Submit every POD line of an order. Per-line failures are reported, not raised.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the order has no lines.
    #[instrument(skip(self))]
    pub async fn submit_all(&self, order_id: &OrderId) -> Result<BatchSubmission, AppError> {
        let lines = self.orders.order_lines(order_id).await?;
        if lines.is_empty() {
            return Err(AppError::NotFound(format!("Order {order_id} not found or has no items")));
        }

        let mut outcomes = Vec::new();
        for line in lines.iter().filter(|l| l.product.fulfillment_type == FulfillmentType::Pod) {
            let result = match self.seller_disabled(line).await {
                Ok(true) => LineResult::Skipped {
                    reason: "Seller fulfillment integration is disabled".to_string(),
                },
                Ok(false) => match self.submit_line(line, None).await {
                    Ok(fo) => LineResult::Submitted {
                        fulfillment_order: Box::new(fo),
                    },
                    Err(AppError::Conflict(reason)) => LineResult::Skipped { reason },
                    Err(e) => LineResult::Failed { error: e.to_string() },
                },
                Err(e) => LineResult::Failed { error: e.to_string() },
            };
            outcomes.push(LineOutcome {
                order_item_id: line.item.id.clone(),
                product_id: line.product.id.clone(),
                result,
            });
        }

        let batch = BatchSubmission::new(order_id.clone(), outcomes);
        info!(
            submitted = batch.submitted,
            skipped = batch.skipped,
            failed = batch.failed,
            "Batch submission finished"
        );
        Ok(batch)
    }

    /// Free the line after the provider definitely refused it.
    async fn release_rejected(&self, reservation: FulfillmentOrder, err: &ProviderError) {
        let id = reservation.id.clone();
        if let Err(e) = self
            .machine
            .apply_local(reservation, ProviderStatus::Failed, &err.to_string())
            .await
        {
            error!(fulfillment_order_id = %id, error = %e, "Failed to release reservation");
        }
    }

    /// Whether the line's store has stored credentials that are switched off.
    async fn seller_disabled(&self, line: &OrderLine) -> Result<bool, AppError> {
        let Some(store_id) = &line.product.store_id else {
            return Ok(false);
        };
        Ok(self
            .credentials
            .get(store_id)
            .await?
            .is_some_and(|row| !row.enabled))
    }

    /// Cancel a fulfillment order that has not entered production.
    ///
    /// The provider order is cancelled first; local state only changes if that
    /// succeeds. A `PENDING` reservation that never reached the provider is
    /// released as `FAILED` once it is older than the reservation grace, which
    /// frees the line for resubmission.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] for an unknown id
    /// - [`AppError::Conflict`] if production may already be underway, the
    ///   submission may still be in flight, or the status moved concurrently
    /// - Provider errors from the remote cancel
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        id: &FulfillmentOrderId,
        reason: Option<&str>,
    ) -> Result<FulfillmentOrder, AppError> {
        let record = self.find(id).await?;

        if !record.status.is_cancellable() {
            return Err(AppError::Conflict(format!(
                "Cannot cancel fulfillment order in status {}: production may already be underway",
                record.status
            )));
        }

        let Some(external_order_id) = record.external_order_id.clone() else {
            return self.release_reservation(record, reason).await;
        };

        self.provider.cancel_order(&record.store_id, &external_order_id).await?;

        let reason = reason.unwrap_or(DEFAULT_OPERATOR_CANCEL_REASON);
        match self.machine.apply_local(record, ProviderStatus::Cancelled, reason).await? {
            TransitionResult::Applied { fulfillment_order, .. } => {
                info!(%external_order_id, "Fulfillment order cancelled");
                Ok(*fulfillment_order)
            }
            TransitionResult::Discarded {
                current: FulfillmentStatus::Cancelled,
                ..
            } => self.find(id).await,
            TransitionResult::Discarded { current, .. } => {
                error!(
                    %external_order_id,
                    %current,
                    "Remote order cancelled but local status moved concurrently"
                );
                Err(AppError::Conflict(format!(
                    "Fulfillment order moved to {current} during cancellation"
                )))
            }
            TransitionResult::Ignored { .. } => Err(AppError::Internal(
                "Cancellation was not recognized as a status change".to_string(),
            )),
        }
    }

    async fn release_reservation(
        &self,
        record: FulfillmentOrder,
        reason: Option<&str>,
    ) -> Result<FulfillmentOrder, AppError> {
        let age = (Utc::now() - record.created_at).to_std().unwrap_or_default();
        if age < self.reservation_grace {
            return Err(AppError::Conflict(format!(
                "Submission of fulfillment order {} may still be in flight; retry in {}s",
                record.id,
                (self.reservation_grace - age).as_secs().max(1)
            )));
        }

        let reason = format!(
            "Reservation released: {}",
            reason.unwrap_or(DEFAULT_OPERATOR_CANCEL_REASON)
        );
        match self.machine.apply_local(record, ProviderStatus::Failed, &reason).await? {
            TransitionResult::Applied { fulfillment_order, .. } => {
                info!("PENDING reservation released");
                Ok(*fulfillment_order)
            }
            TransitionResult::Discarded { current, .. } => Err(AppError::Conflict(format!(
                "Fulfillment order moved to {current} during cancellation"
            ))),
            TransitionResult::Ignored { .. } => Err(AppError::Internal(
                "Release was not recognized as a status change".to_string(),
            )),
        }
    }

    /// A fulfillment order with recent webhook events and, while it is still
    /// active, the provider's live view of it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &FulfillmentOrderId) -> Result<FulfillmentOrderDetail, AppError> {
        let record = self.find(id).await?;
        let events = self
            .webhook_events
            .list_for_fulfillment_order(id, RECENT_EVENTS)
            .await?;

        let (live_status, live_status_error) = match record.external_order_id.as_deref() {
            Some(external_id) if !record.status.is_terminal() => {
                match self.provider.get_order(&record.store_id, external_id).await {
                    Ok(order) => (Some(order), None),
                    Err(e) => {
                        warn!(error = %e, "Live provider status unavailable");
                        (None, Some(e.to_string()))
                    }
                }
            }
            _ => (None, None),
        };

        Ok(FulfillmentOrderDetail {
            fulfillment_order: record,
            events,
            live_status,
            live_status_error,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the repository fails.
    pub async fn list(&self, filter: FulfillmentFilter) -> Result<Vec<FulfillmentOrder>, AppError> {
        Ok(self.fulfillment.list(&filter.normalized()).await?)
    }

    async fn find(&self, id: &FulfillmentOrderId) -> Result<FulfillmentOrder, AppError> {
        self.fulfillment
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Fulfillment order {id} not found")))
    }
}
