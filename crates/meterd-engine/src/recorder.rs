//! The usage recorder.
//!
//! Records durable usage events and feeds the admission path. An event is
//! attributed to the billing period containing `occurred_at`, never the
//! period current at arrival time. Events for CLOSED periods are flagged
//! for manual review instead of being applied; closed financial state is
//! never mutated automatically.

use std::sync::Arc;

use meterd_core::{FlaggedEvent, MeterError, PeriodId, Result, UsageEvent};
use meterd_store::{Store, StoreError};

use crate::ledger::{DebitOutcome, QuotaLedger};

/// Outcome of recording a usage event.
#[derive(Debug)]
pub enum RecordOutcome {
    /// The event was admitted, debited and durably recorded.
    Accepted {
        /// The period the event was attributed to.
        period_id: PeriodId,
        /// The ledger's debit outcome, including threshold crossings.
        debit: DebitOutcome,
    },

    /// The event ID was seen before; nothing changed. Callers treat this
    /// as success.
    Duplicate,
}

/// Records usage events and drives the ledger.
pub struct UsageRecorder<S> {
    store: Arc<S>,
    ledger: Arc<QuotaLedger<S>>,
}

impl<S: Store> UsageRecorder<S> {
    /// Create a recorder over the given store and ledger.
    #[must_use]
    pub fn new(store: Arc<S>, ledger: Arc<QuotaLedger<S>>) -> Self {
        Self { store, ledger }
    }

    /// Record a usage event: attribute it to a period, debit the quota
    /// balance, and append it to the durable event log.
    ///
    /// The event ID doubles as the debit idempotency key, so a retried
    /// request that debited but failed before the log write completes the
    /// log write without debiting again.
    ///
    /// Events whose period is OPEN are fully admission-checked. Events
    /// landing in a CLOSING period arrived late but within the grace
    /// window; they are applied without admission enforcement because the
    /// usage already happened. Events for a CLOSED period are flagged and
    /// rejected.
    ///
    /// # Errors
    ///
    /// - `MeterError::PeriodNotOpen` if no period covers `occurred_at`.
    /// - `MeterError::LateEventRejected` if the covering period is CLOSED.
    /// - `MeterError::AdmissionDenied` if the ledger denies the quantity.
    pub fn record(&self, event: &UsageEvent) -> Result<RecordOutcome> {
        if self.store.has_event(&event.event_id)? {
            return Ok(RecordOutcome::Duplicate);
        }

        let period = self
            .store
            .find_period_containing(&event.account_id, event.occurred_at)?
            .ok_or_else(|| MeterError::PeriodNotOpen {
                account_id: event.account_id.to_string(),
            })?;

        if period.is_closed() {
            let flagged = FlaggedEvent::new(event.clone(), "period already closed");
            self.store.put_flagged_event(&flagged, &period.period_id)?;

            tracing::warn!(
                event_id = %event.event_id,
                account_id = %event.account_id,
                period_id = %period.period_id,
                "Late event flagged for manual review"
            );

            return Err(MeterError::LateEventRejected {
                event_id: event.event_id.clone(),
                period_id: period.period_id.to_string(),
            });
        }

        let enforce = period.is_open();
        let debit = self.ledger.check_and_debit(
            &period,
            event.metric,
            event.quantity,
            Some(&event.event_id),
            enforce,
        )?;

        match self.store.record_event(event, &period.period_id) {
            Ok(()) => {}
            // The debit replayed and the log write already happened.
            Err(StoreError::DuplicateEvent { .. }) => return Ok(RecordOutcome::Duplicate),
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(
            event_id = %event.event_id,
            account_id = %event.account_id,
            metric = %event.metric,
            quantity = %event.quantity,
            period_id = %period.period_id,
            "Usage event recorded"
        );

        Ok(RecordOutcome::Accepted {
            period_id: period.period_id,
            debit,
        })
    }
}
