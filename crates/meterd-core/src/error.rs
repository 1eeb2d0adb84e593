//! Error types for meterd.

use crate::ids::IdError;
use crate::Metric;

/// Result type for meterd operations.
pub type Result<T> = std::result::Result<T, MeterError>;

/// Errors that can occur in metering and billing operations.
#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    /// Quota or credit exhausted; user-visible, not retried.
    #[error("admission denied: {metric} requested={requested}, remaining={remaining}")]
    AdmissionDenied {
        /// The metric that was denied.
        metric: Metric,
        /// Units requested.
        requested: u64,
        /// Allowance units remaining.
        remaining: u64,
    },

    /// Idempotency hit; treated as success by callers.
    #[error("duplicate event: {event_id}")]
    DuplicateEvent {
        /// The event ID that was duplicated.
        event_id: String,
    },

    /// Storage failed in a way the caller may retry with backoff.
    #[error("transient storage error: {0}")]
    TransientStorage(String),

    /// Aggregation found the live balance diverging from the recomputed
    /// total. Logged and auto-corrected via delta, never dropped.
    #[error(
        "reconciliation conflict: {metric} period={period_id} ledger={ledger_consumed}, recomputed={recomputed}"
    )]
    ReconciliationConflict {
        /// The metric that diverged.
        metric: Metric,
        /// The period in which the divergence was found.
        period_id: String,
        /// What the ledger believed was consumed.
        ledger_consumed: u64,
        /// What re-aggregating the event log produced.
        recomputed: u64,
    },

    /// Event arrived after its period closed; surfaced for manual
    /// adjustment, never auto-applied to closed financials.
    #[error("late event rejected: {event_id} (period {period_id} is closed)")]
    LateEventRejected {
        /// The rejected event.
        event_id: String,
        /// The closed period the event belonged to.
        period_id: String,
    },

    /// No plan version pinned for the period; blocks that invoice only.
    #[error("pricing configuration missing for period {period_id}")]
    PricingConfigMissing {
        /// The period without a pinned plan.
        period_id: String,
    },

    /// No open billing period covers the instant of the request.
    #[error("no open billing period for account {account_id}")]
    PeriodNotOpen {
        /// The account without an open period.
        account_id: String,
    },

    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("account", "plan", "period", "invoice", ...).
        entity: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// Invalid quantity or amount.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Operation not valid in the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl MeterError {
    /// Whether a caller may retry the failed operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStorage(_))
    }
}
