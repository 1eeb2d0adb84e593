//! Usage event types.
//!
//! A usage event is the durable record of one metered operation. Events are
//! immutable once written and are the single source of truth for aggregation;
//! the billing period an event belongs to is decided by `occurred_at`, never
//! by `recorded_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, Metric};

/// A single metered usage event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Caller-supplied idempotency key, unique across all events.
    pub event_id: String,

    /// The account being metered.
    pub account_id: AccountId,

    /// What was used.
    pub metric: Metric,

    /// Quantity used (calls, lines, documents).
    pub quantity: u64,

    /// When the usage happened. Determines the billing period.
    pub occurred_at: DateTime<Utc>,

    /// When the event reached the recorder. May lag `occurred_at`.
    pub recorded_at: DateTime<Utc>,
}

impl UsageEvent {
    /// Create a new event, stamping `recorded_at` with the current time.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        account_id: AccountId,
        metric: Metric,
        quantity: u64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            account_id,
            metric,
            quantity,
            occurred_at,
            recorded_at: Utc::now(),
        }
    }

    /// Whether the event arrived after the period it belongs to ended.
    #[must_use]
    pub fn is_late(&self, period_end: DateTime<Utc>) -> bool {
        self.recorded_at >= period_end
    }
}

/// A usage event that could not be applied and awaits manual review.
///
/// Produced when an event's `occurred_at` falls in a period that has already
/// CLOSED; closed financial state is never mutated automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedEvent {
    /// The rejected event, preserved verbatim.
    pub event: UsageEvent,

    /// Why the event was flagged.
    pub reason: String,

    /// When the event was flagged.
    pub flagged_at: DateTime<Utc>,
}

impl FlaggedEvent {
    /// Flag an event for manual review.
    #[must_use]
    pub fn new(event: UsageEvent, reason: impl Into<String>) -> Self {
        Self {
            event,
            reason: reason.into(),
            flagged_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_stamps_recorded_at() {
        let occurred = Utc::now() - chrono::Duration::hours(2);
        let event = UsageEvent::new("evt_1", AccountId::generate(), Metric::ApiCall, 3, occurred);

        assert_eq!(event.quantity, 3);
        assert_eq!(event.occurred_at, occurred);
        assert!(event.recorded_at > event.occurred_at);
    }

    #[test]
    fn late_detection() {
        let occurred = Utc::now() - chrono::Duration::days(3);
        let event = UsageEvent::new(
            "evt_2",
            AccountId::generate(),
            Metric::DocsGenerated,
            1,
            occurred,
        );

        let period_end = Utc::now() - chrono::Duration::days(1);
        assert!(event.is_late(period_end));
        assert!(!event.is_late(Utc::now() + chrono::Duration::days(1)));
    }
}
