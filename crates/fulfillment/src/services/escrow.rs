//! Escrow release trigger on confirmed delivery.
//!
//! Moves the order's escrow from `HELD` to `PENDING_RELEASE` with an
//! auto-release date, and records a courier delivery confirmation. Funds are
//! released later by the payments service. Failures here never fail the
//! delivery that triggered them.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use podbridge_core::{EscrowStatus, OrderId};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::db::settings::{ESCROW_DEFAULT_HOLD_DAYS, u32_setting};
use crate::db::{EscrowLedger, RepositoryError, SettingsRepository};
use crate::models::DeliveryConfirmation;

/// Hold period when the setting is absent.
pub const DEFAULT_HOLD_DAYS: u32 = 7;
pub const CONFIRMED_BY: &str = "PROVIDER_WEBHOOK";
pub const CONFIRMATION_TYPE: &str = "COURIER_CONFIRMED";

/// What the trigger did for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EscrowOutcome {
    PendingRelease { auto_release_at: DateTime<Utc> },
    NoEscrow,
    NotHeld { status: EscrowStatus },
    Failed { error: String },
}

/// Starts the escrow hold period for delivered orders.
#[derive(Clone)]
pub struct EscrowTrigger {
    ledger: Arc<dyn EscrowLedger>,
    settings: Arc<dyn SettingsRepository>,
}

impl EscrowTrigger {
    #[must_use]
    pub fn new(ledger: Arc<dyn EscrowLedger>, settings: Arc<dyn SettingsRepository>) -> Self {
        Self { ledger, settings }
    }

    /// Start the hold period for an order whose lines are all delivered.
    ///
    /// Errors are logged and reported in the outcome, never raised.
    #[instrument(skip(self))]
    pub async fn on_order_delivered(&self, order_id: &OrderId) -> EscrowOutcome {
        match self.trigger(order_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Escrow trigger failed");
                EscrowOutcome::Failed { error: e.to_string() }
            }
        }
    }

    async fn trigger(&self, order_id: &OrderId) -> Result<EscrowOutcome, RepositoryError> {
        let Some(escrow) = self.ledger.find_by_order_id(order_id).await? else {
            info!("No escrow for delivered order");
            return Ok(EscrowOutcome::NoEscrow);
        };

        if escrow.status != EscrowStatus::Held {
            warn!(escrow_id = %escrow.id, status = %escrow.status, "Escrow not held, skipping");
            return Ok(EscrowOutcome::NotHeld { status: escrow.status });
        }

        let hold_days =
            u32_setting(self.settings.as_ref(), ESCROW_DEFAULT_HOLD_DAYS, DEFAULT_HOLD_DAYS).await?;
        let auto_release_at = Utc::now() + Duration::days(i64::from(hold_days));

        if !self
            .ledger
            .transition_to_pending_release(&escrow.id, auto_release_at)
            .await?
        {
            let status = self
                .ledger
                .find_by_order_id(order_id)
                .await?
                .map_or(escrow.status, |e| e.status);
            warn!(escrow_id = %escrow.id, %status, "Escrow left HELD concurrently");
            return Ok(EscrowOutcome::NotHeld { status });
        }

        self.ledger
            .record_delivery_confirmation(&DeliveryConfirmation {
                order_id: order_id.clone(),
                confirmed_by: CONFIRMED_BY.to_string(),
                confirmation_type: CONFIRMATION_TYPE.to_string(),
                notes: Some("Delivery confirmed by print-on-demand provider".to_string()),
            })
            .await?;

        info!(
            escrow_id = %escrow.id,
            hold_days,
            %auto_release_at,
            "Escrow moved to pending release"
        );
        Ok(EscrowOutcome::PendingRelease { auto_release_at })
    }
}
