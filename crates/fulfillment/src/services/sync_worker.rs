//! Periodic drift correction for missed webhooks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use super::state_machine::{StatusMachine, TransitionResult};
use crate::db::FulfillmentRepository;
use crate::error::AppError;

/// Staleness window when none is configured.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);
/// Records examined per pass.
pub const DEFAULT_BATCH_SIZE: i64 = 100;

/// Counts from one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub examined: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Re-syncs non-terminal fulfillment orders that have gone quiet.
#[derive(Clone)]
pub struct SyncWorker {
    machine: StatusMachine,
    fulfillment: Arc<dyn FulfillmentRepository>,
    stale_after: Duration,
    batch_size: i64,
}

impl SyncWorker {
    #[must_use]
    pub fn new(machine: StatusMachine, fulfillment: Arc<dyn FulfillmentRepository>) -> Self {
        Self {
            machine,
            fulfillment,
            stale_after: DEFAULT_STALE_AFTER,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[must_use]
    pub const fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sync active records idle for the staleness window, least recent first.
    ///
    /// Every examined record is checkpointed whatever the outcome, so the next
    /// pass moves on to the records behind it. Per-record failures are logged
    /// and counted; they do not stop the pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the stale records cannot be listed.
    #[instrument(skip(self), fields(stale_after_secs = self.stale_after.as_secs()))]
    pub async fn run_once(&self) -> Result<SyncReport, AppError> {
        let window = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| AppError::Internal(format!("Invalid staleness window: {e}")))?;
        let stale = self
            .fulfillment
            .list_stale_active(Utc::now() - window, self.batch_size)
            .await?;

        let mut report = SyncReport {
            examined: stale.len(),
            ..SyncReport::default()
        };

        for record in stale {
            if record.external_order_id.is_none() {
                debug!(
                    fulfillment_order_id = %record.id,
                    "Skipping reservation without external id"
                );
                report.unchanged += 1;
            } else {
                match self.machine.sync(&record.id).await {
                    Ok(TransitionResult::Applied { .. }) => report.applied += 1,
                    Ok(_) => report.unchanged += 1,
                    Err(e) => {
                        warn!(fulfillment_order_id = %record.id, error = %e, "Sync failed");
                        report.failed += 1;
                    }
                }
            }
            if let Err(e) = self.fulfillment.mark_sync_checked(&record.id, Utc::now()).await {
                warn!(fulfillment_order_id = %record.id, error = %e, "Failed to checkpoint sync");
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                applied = report.applied,
                failed = report.failed,
                "Sync pass complete"
            );
        }
        Ok(report)
    }

    /// Run [`Self::run_once`] every `interval` on a background task.
    #[must_use]
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        info!(interval_secs = interval.as_secs(), "Spawning background fulfillment sync task");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so startup is not a sync burst.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!(error = %e, "Fulfillment sync pass failed");
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::provider::ProviderOrder;
    use crate::provider::ProviderShipment;
    use crate::provider::fake::ScriptedFailure;
    use crate::testing::Harness;
    use podbridge_core::FulfillmentStatus;

    fn worker(h: &Harness) -> SyncWorker {
        SyncWorker::new(h.services.machine.clone(), h.memory.clone())
    }

    #[tokio::test]
    async fn test_only_stale_records_are_synced() {
        let h = Harness::new();
        let lines = h.submitted_lines("ord_1", 2).await;
        for line in &lines {
            h.provider.set_remote_order(ProviderOrder {
                id: line.external_order_id.clone().unwrap(),
                order_reference_id: None,
                fulfillment_status: Some("shipped".to_string()),
                shipments: vec![ProviderShipment {
                    tracking_code: Some("1Z".to_string()),
                    ..ProviderShipment::default()
                }],
            });
        }
        h.memory
            .set_fulfillment_updated_at(&lines[0].id, Utc::now() - chrono::Duration::hours(2));

        let report = worker(&h).run_once().await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.applied, 1);

        let first = h.fulfillment_order(&lines[0].id).await;
        assert_eq!(first.status, FulfillmentStatus::Shipped);
        assert_eq!(first.tracking_number.as_deref(), Some("1Z"));
        assert_eq!(h.fulfillment_order(&lines[1].id).await.status, FulfillmentStatus::Submitted);
    }

    #[tokio::test]
    async fn test_passes_advance_past_unchanged_records() {
        let h = Harness::new();
        let lines = h.submitted_lines("ord_1", 2).await;
        h.memory
            .set_fulfillment_updated_at(&lines[0].id, Utc::now() - chrono::Duration::hours(3));
        h.memory
            .set_fulfillment_updated_at(&lines[1].id, Utc::now() - chrono::Duration::hours(2));
        h.provider.set_remote_order(ProviderOrder {
            id: lines[1].external_order_id.clone().unwrap(),
            order_reference_id: None,
            fulfillment_status: Some("printed".to_string()),
            shipments: Vec::new(),
        });
        let worker = worker(&h).with_batch_size(1);

        let first = worker.run_once().await.unwrap();
        assert_eq!((first.examined, first.unchanged), (1, 1));

        let second = worker.run_once().await.unwrap();
        assert_eq!((second.examined, second.applied), (1, 1));
        assert_eq!(h.fulfillment_order(&lines[1].id).await.status, FulfillmentStatus::Produced);

        let third = worker.run_once().await.unwrap();
        assert_eq!(third.examined, 0);
    }

    #[tokio::test]
    async fn test_failed_record_does_not_block_the_next_one() {
        let h = Harness::new();
        let lines = h.submitted_lines("ord_1", 2).await;
        h.memory
            .set_fulfillment_updated_at(&lines[0].id, Utc::now() - chrono::Duration::hours(3));
        h.memory
            .set_fulfillment_updated_at(&lines[1].id, Utc::now() - chrono::Duration::hours(2));
        let worker = worker(&h).with_batch_size(1);

        h.provider
            .fail_get_order(Some(ScriptedFailure::Unavailable("down".into())));
        assert_eq!(worker.run_once().await.unwrap().failed, 1);

        h.provider.fail_get_order(None);
        let next = worker.run_once().await.unwrap();
        assert_eq!((next.examined, next.failed), (1, 0));
        assert_eq!(worker.run_once().await.unwrap().examined, 0);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let h = Harness::new();
        let line = h.submitted_lines("ord_1", 1).await.remove(0);
        h.memory
            .set_fulfillment_updated_at(&line.id, Utc::now() - chrono::Duration::hours(2));
        h.provider
            .fail_get_order(Some(ScriptedFailure::Unavailable("down".into())));

        let report = worker(&h).run_once().await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_unchanged_remote_status_counts_as_unchanged() {
        let h = Harness::new();
        let line = h.submitted_lines("ord_1", 1).await.remove(0);
        h.memory
            .set_fulfillment_updated_at(&line.id, Utc::now() - chrono::Duration::hours(2));

        let report = worker(&h)
            .with_stale_after(Duration::from_secs(60))
            .run_once()
            .await
            .unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.applied, 0);
    }
}
