//! Application state.

use std::sync::Arc;

use chrono::Duration;

use meterd_engine::{Aggregator, InvoiceBuilder, QuotaLedger, ThresholdCrossing, UsageRecorder};
use meterd_store::RocksStore;

use crate::config::ServiceConfig;
use crate::notify::NotificationClient;
use crate::payments::PaymentClient;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<RocksStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// The quota ledger (admission path).
    pub ledger: Arc<QuotaLedger<RocksStore>>,

    /// The usage recorder.
    pub recorder: Arc<UsageRecorder<RocksStore>>,

    /// The aggregator and period lifecycle driver.
    pub aggregator: Arc<Aggregator<RocksStore>>,

    /// The invoice builder.
    pub invoices: Arc<InvoiceBuilder<RocksStore>>,

    /// Payment collaborator client (optional).
    pub payments: Option<Arc<PaymentClient>>,

    /// Notification collaborator client (optional).
    pub notifier: Option<Arc<NotificationClient>>,
}

impl AppState {
    /// Create a new application state, wiring the engine over the store.
    #[must_use]
    pub fn new(store: Arc<RocksStore>, config: ServiceConfig) -> Self {
        let ledger = Arc::new(QuotaLedger::new(Arc::clone(&store)));
        let recorder = Arc::new(UsageRecorder::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
        ));
        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&store),
            Duration::hours(config.grace_hours),
        ));
        let invoices = Arc::new(InvoiceBuilder::new(Arc::clone(&store)));

        let payments = config
            .payment_api_url
            .as_ref()
            .zip(config.payment_api_key.as_ref())
            .map(|(url, key)| {
                tracing::info!(payment_url = %url, "Payment collaborator enabled");
                Arc::new(PaymentClient::new(url, key))
            });
        if payments.is_none() {
            tracing::warn!("Payment collaborator not configured - invoices will not be submitted");
        }

        let notifier = config.notify_webhook_url.as_ref().map(|url| {
            tracing::info!(notify_url = %url, "Threshold notifications enabled");
            Arc::new(NotificationClient::new(url))
        });
        if notifier.is_none() {
            tracing::warn!("Notification webhook not configured - threshold alerts disabled");
        }

        Self {
            store,
            config,
            ledger,
            recorder,
            aggregator,
            invoices,
            payments,
            notifier,
        }
    }

    /// Forward threshold crossings to the notification collaborator, if
    /// configured. Never blocks or fails the caller.
    pub fn dispatch_thresholds(&self, crossings: Vec<ThresholdCrossing>) {
        if let Some(notifier) = &self.notifier {
            notifier.dispatch(crossings);
        }
    }
}
