//! Fulfillment business logic.
//!
//! # Architecture
//!
//! - Credentials: [`credential_store`] encrypts seller credentials at rest,
//!   [`credential_resolver`] picks seller or platform credentials per call
//!   behind a [`credential_cache`]
//! - Outbound: [`submission`] reserves and submits order lines, [`catalog`]
//!   answers read-only product queries
//! - Inbound: [`webhooks`] verifies and deduplicates provider events, and
//!   [`state_machine`] applies them, firing [`escrow`] on full delivery
//! - [`sync_worker`] polls the provider for records whose webhooks went missing

pub mod catalog;
pub mod connection;
pub mod credential_cache;
pub mod credential_resolver;
pub mod credential_store;
pub mod escrow;
pub mod seller_settings;
pub mod state_machine;
pub mod submission;
pub mod sync_worker;
pub mod webhooks;

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::db::Repositories;
use crate::provider::FulfillmentProvider;

pub use catalog::{CatalogBrowser, PlatformStatus};
pub use connection::{ConnectionTestResult, ConnectionTester};
pub use credential_cache::{CredentialCache, MokaCredentialCache};
pub use credential_resolver::{CredentialResolver, PlatformAccount};
pub use credential_store::CredentialStore;
pub use escrow::{EscrowOutcome, EscrowTrigger};
pub use seller_settings::{SaveSettingsRequest, SellerSettingsService, SellerSettingsView};
pub use state_machine::{StatusMachine, TransitionResult};
pub use submission::{BatchSubmission, FulfillmentOrderDetail, SubmissionPipeline, SubmitRequest};
pub use sync_worker::{SyncReport, SyncWorker};
pub use webhooks::{WebhookOutcome, WebhookProcessor};

/// Deployment-specific service settings.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Public base URL used to build tenant webhook URLs.
    pub public_base_url: String,
    /// Secret for webhooks delivered to the platform endpoint.
    pub platform_webhook_secret: Option<SecretString>,
    pub webhook_lease: Duration,
    pub sync_stale_after: Duration,
    /// How long a PENDING reservation is treated as in flight. Keep it above
    /// the provider timeout.
    pub reservation_grace: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:3002".to_string(),
            platform_webhook_secret: None,
            webhook_lease: webhooks::DEFAULT_PROCESSING_LEASE,
            sync_stale_after: sync_worker::DEFAULT_STALE_AFTER,
            reservation_grace: submission::DEFAULT_RESERVATION_GRACE,
        }
    }
}

/// Every service, wired to one set of repositories and one provider.
#[derive(Clone)]
pub struct Services {
    pub resolver: CredentialResolver,
    pub settings: SellerSettingsService,
    pub catalog: CatalogBrowser,
    pub submission: SubmissionPipeline,
    pub machine: StatusMachine,
    pub webhooks: WebhookProcessor,
    pub sync: SyncWorker,
}

impl Services {
    /// Compose the services.
    ///
    /// The provider is built by the caller because it takes the resolver as its
    /// credential source.
    #[must_use]
    pub fn new(
        repos: &Repositories,
        resolver: CredentialResolver,
        provider: Arc<dyn FulfillmentProvider>,
        options: ServiceOptions,
    ) -> Self {
        let store = resolver.store().clone();
        let escrow = EscrowTrigger::new(repos.escrow.clone(), repos.settings.clone());
        let machine = StatusMachine::new(repos.fulfillment.clone(), provider.clone(), escrow);

        Self {
            settings: SellerSettingsService::new(
                store.clone(),
                resolver.clone(),
                ConnectionTester::new(provider.clone()),
                options.public_base_url,
            ),
            catalog: CatalogBrowser::new(
                provider.clone(),
                resolver.clone(),
                repos.settings.clone(),
            ),
            submission: SubmissionPipeline::new(
                repos,
                provider.clone(),
                resolver.clone(),
                machine.clone(),
            )
            .with_reservation_grace(options.reservation_grace),
            webhooks: WebhookProcessor::new(
                store,
                options.platform_webhook_secret,
                repos.webhook_events.clone(),
                repos.fulfillment.clone(),
                machine.clone(),
            )
            .with_lease(options.webhook_lease),
            sync: SyncWorker::new(machine.clone(), repos.fulfillment.clone())
                .with_stale_after(options.sync_stale_after),
            machine,
            resolver,
        }
    }
}
