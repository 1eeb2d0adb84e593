//! The aggregator and billing-period lifecycle.
//!
//! Aggregation recomputes authoritative per-metric totals from the durable
//! event log and reconciles them against the live quota balances. Totals
//! are keyed upserts, so re-running aggregation over an unchanged event set
//! is a no-op. When a balance diverges from the recomputed total the
//! aggregator corrects it to the event-derived truth and reports the delta;
//! divergences are surfaced, never silently dropped.
//!
//! The lifecycle side moves periods OPEN -> CLOSING at `period_end`, keeps
//! them in CLOSING for a grace window that admits stragglers, then
//! aggregates one final time and moves them to CLOSED. It also opens the
//! next monthly period, pinning the account's plan version at open time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Months, Utc};

use meterd_core::{
    Account, AccountId, BillingPeriod, MeterError, Metric, PeriodId, PeriodTotal, QuotaBalance,
    Result,
};
use meterd_store::Store;

/// Default grace window between `period_end` and final close.
pub const DEFAULT_GRACE_HOURS: i64 = 48;

/// A divergence between the live balance and the recomputed total,
/// corrected during aggregation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReconciliationDelta {
    /// The account whose balance diverged.
    pub account_id: AccountId,

    /// The metric that diverged.
    pub metric: Metric,

    /// The period in which the divergence was found.
    pub period_id: PeriodId,

    /// What the ledger believed was consumed.
    pub ledger_consumed: u64,

    /// What re-aggregating the event log produced. The balance now holds
    /// this value.
    pub recomputed: u64,
}

/// Summary of one lifecycle pass over an account.
#[derive(Debug, Default)]
pub struct LifecycleSummary {
    /// Periods moved OPEN -> CLOSING.
    pub closing_started: usize,

    /// Periods moved CLOSING -> CLOSED after final aggregation.
    pub closed: usize,

    /// Whether a new period was opened for the account.
    pub opened: bool,

    /// Reconciliation deltas found while closing.
    pub deltas: Vec<ReconciliationDelta>,
}

/// Recomputes totals and drives the period lifecycle.
pub struct Aggregator<S> {
    store: Arc<S>,
    grace: Duration,
}

impl<S: Store> Aggregator<S> {
    /// Create an aggregator with the given grace window.
    #[must_use]
    pub fn new(store: Arc<S>, grace: Duration) -> Self {
        Self { store, grace }
    }

    /// Recompute authoritative totals for a period from the event log and
    /// reconcile the live balances against them. Idempotent: totals are
    /// keyed upserts and an unchanged event set produces no deltas.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn aggregate_period(&self, period: &BillingPeriod) -> Result<Vec<ReconciliationDelta>> {
        let events = self.store.list_events_in_period(&period.period_id)?;

        let mut totals: HashMap<Metric, (u64, u64)> = HashMap::new();
        for event in &events {
            let entry = totals.entry(event.metric).or_default();
            entry.0 += event.quantity;
            entry.1 += 1;
        }

        let now = Utc::now();
        let mut deltas = Vec::new();

        for metric in Metric::ALL {
            let (total_quantity, event_count) = totals.get(&metric).copied().unwrap_or((0, 0));
            let balance =
                self.store
                    .get_balance(&period.account_id, metric, &period.period_id)?;

            if event_count == 0 && balance.is_none() {
                continue;
            }

            self.store.upsert_period_total(&PeriodTotal {
                account_id: period.account_id,
                metric,
                period_id: period.period_id,
                total_quantity,
                event_count,
                aggregated_at: now,
            })?;

            match balance {
                Some(mut balance) if balance.consumed != total_quantity => {
                    let conflict = MeterError::ReconciliationConflict {
                        metric,
                        period_id: period.period_id.to_string(),
                        ledger_consumed: balance.consumed,
                        recomputed: total_quantity,
                    };
                    tracing::warn!(
                        account_id = %period.account_id,
                        "{conflict}, correcting balance to event-derived total"
                    );

                    deltas.push(ReconciliationDelta {
                        account_id: period.account_id,
                        metric,
                        period_id: period.period_id,
                        ledger_consumed: balance.consumed,
                        recomputed: total_quantity,
                    });

                    balance.consumed = total_quantity;
                    balance.credit_units_applied =
                        balance.credit_units_applied.min(total_quantity);
                    balance.updated_at = now;
                    self.store.apply_ledger_update(&balance, &[], None)?;
                }
                Some(_) => {}
                None if total_quantity > 0 => {
                    // Events exist but no balance was ever written: rebuild
                    // it from the log so pricing sees the usage.
                    deltas.push(ReconciliationDelta {
                        account_id: period.account_id,
                        metric,
                        period_id: period.period_id,
                        ledger_consumed: 0,
                        recomputed: total_quantity,
                    });

                    let allowance = self.pinned_allowance(period, metric)?;
                    let mut balance = QuotaBalance::new(
                        period.account_id,
                        metric,
                        period.period_id,
                        allowance,
                        0,
                    );
                    balance.consumed = total_quantity;
                    self.store.apply_ledger_update(&balance, &[], None)?;
                }
                None => {}
            }
        }

        Ok(deltas)
    }

    /// Run one lifecycle pass for an account at `now`: start closing due
    /// periods, close those past the grace window (aggregating first), and
    /// make sure an open period covers `now`.
    ///
    /// # Errors
    ///
    /// - `MeterError::NotFound` if the account does not exist.
    pub fn tick_account(&self, account_id: &AccountId, now: DateTime<Utc>) -> Result<LifecycleSummary> {
        let account = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| MeterError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            })?;

        let mut summary = LifecycleSummary::default();

        for mut period in self.store.list_periods(account_id)? {
            if period.is_open() && now >= period.period_end {
                period.begin_closing();
                self.store.put_period(&period)?;
                summary.closing_started += 1;

                tracing::info!(
                    account_id = %account_id,
                    period_id = %period.period_id,
                    "Billing period entering grace window"
                );
            }

            if period.status == meterd_core::PeriodStatus::Closing
                && now >= period.period_end + self.grace
            {
                let mut deltas = self.aggregate_period(&period)?;
                summary.deltas.append(&mut deltas);

                period.close(now);
                self.store.put_period(&period)?;
                summary.closed += 1;

                tracing::info!(
                    account_id = %account_id,
                    period_id = %period.period_id,
                    "Billing period closed"
                );
            }
        }

        summary.opened = self.ensure_open_period(&account, now)?;
        Ok(summary)
    }

    /// Open a monthly period covering `now` if none exists, pinning the
    /// account's current plan version. Returns whether one was opened.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn ensure_open_period(&self, account: &Account, now: DateTime<Utc>) -> Result<bool> {
        if self
            .store
            .find_period_containing(&account.account_id, now)?
            .is_some()
        {
            return Ok(false);
        }

        // Continue from the latest period's end when contiguous, otherwise
        // start a fresh cycle at `now`.
        let start = self
            .store
            .list_periods(&account.account_id)?
            .last()
            .map(|p| p.period_end)
            .filter(|end| *end <= now && now < *end + Months::new(1))
            .unwrap_or(now);

        let end = start
            .checked_add_months(Months::new(1))
            .ok_or_else(|| MeterError::InvalidState("period end overflows calendar".into()))?;

        let period = BillingPeriod::open(account.account_id, start, end, account.plan_id);
        self.store.put_period(&period)?;

        tracing::info!(
            account_id = %account.account_id,
            period_id = %period.period_id,
            start = %start,
            end = %end,
            "Opened billing period"
        );

        Ok(true)
    }

    fn pinned_allowance(&self, period: &BillingPeriod, metric: Metric) -> Result<u64> {
        let Some(plan_id) = period.pinned_plan_id else {
            return Ok(0);
        };
        Ok(self
            .store
            .get_plan(&plan_id)?
            .map_or(0, |p| p.included_allowance(metric)))
    }
}

impl<S: Store> Aggregator<S> {
    /// An aggregator with the default 48-hour grace window.
    #[must_use]
    pub fn with_default_grace(store: Arc<S>) -> Self {
        Self::new(store, Duration::hours(DEFAULT_GRACE_HOURS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meterd_core::{PlanId, PricingPlan, UsageEvent};
    use meterd_store::RocksStore;
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<RocksStore>,
        aggregator: Aggregator<RocksStore>,
        account_id: AccountId,
        period: BillingPeriod,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());

        let account_id = AccountId::generate();
        let plan_id = PlanId::generate();
        let start = Utc::now() - chrono::Duration::days(31);

        store.put_plan(&PricingPlan::pro(plan_id, start)).unwrap();
        store
            .put_account(&Account::new(account_id, Some(plan_id)))
            .unwrap();

        let period = BillingPeriod::open(
            account_id,
            start,
            start + chrono::Duration::days(30),
            Some(plan_id),
        );
        store.put_period(&period).unwrap();

        Fixture {
            aggregator: Aggregator::new(Arc::clone(&store), Duration::hours(48)),
            store,
            account_id,
            period,
            _dir: dir,
        }
    }

    fn log_event(f: &Fixture, id: &str, quantity: u64) {
        let event = UsageEvent::new(
            id,
            f.account_id,
            Metric::ApiCall,
            quantity,
            f.period.period_start + chrono::Duration::hours(1),
        );
        f.store.record_event(&event, &f.period.period_id).unwrap();
    }

    fn write_balance(f: &Fixture, consumed: u64) {
        let mut balance = QuotaBalance::new(
            f.account_id,
            Metric::ApiCall,
            f.period.period_id,
            1000,
            0,
        );
        balance.consumed = consumed;
        f.store.apply_ledger_update(&balance, &[], None).unwrap();
    }

    #[test]
    fn totals_match_event_log() {
        let f = fixture();
        log_event(&f, "e1", 100);
        log_event(&f, "e2", 250);
        write_balance(&f, 350);

        let deltas = f.aggregator.aggregate_period(&f.period).unwrap();
        assert!(deltas.is_empty());

        let total = f
            .store
            .get_period_total(&f.account_id, Metric::ApiCall, &f.period.period_id)
            .unwrap()
            .unwrap();
        assert_eq!(total.total_quantity, 350);
        assert_eq!(total.event_count, 2);
    }

    #[test]
    fn rerun_over_unchanged_log_is_a_noop() {
        let f = fixture();
        log_event(&f, "e1", 100);
        write_balance(&f, 100);

        assert!(f.aggregator.aggregate_period(&f.period).unwrap().is_empty());
        assert!(f.aggregator.aggregate_period(&f.period).unwrap().is_empty());

        let total = f
            .store
            .get_period_total(&f.account_id, Metric::ApiCall, &f.period.period_id)
            .unwrap()
            .unwrap();
        assert_eq!(total.total_quantity, 100);
    }

    #[test]
    fn diverging_balance_is_corrected_and_reported() {
        let f = fixture();
        log_event(&f, "e1", 100);
        log_event(&f, "e2", 200);
        write_balance(&f, 250); // ledger drifted

        let deltas = f.aggregator.aggregate_period(&f.period).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].ledger_consumed, 250);
        assert_eq!(deltas[0].recomputed, 300);

        let balance = f
            .store
            .get_balance(&f.account_id, Metric::ApiCall, &f.period.period_id)
            .unwrap()
            .unwrap();
        assert_eq!(balance.consumed, 300);

        // Second run agrees.
        assert!(f.aggregator.aggregate_period(&f.period).unwrap().is_empty());
    }

    #[test]
    fn missing_balance_is_rebuilt_from_log() {
        let f = fixture();
        log_event(&f, "e1", 42);

        let deltas = f.aggregator.aggregate_period(&f.period).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].ledger_consumed, 0);

        let balance = f
            .store
            .get_balance(&f.account_id, Metric::ApiCall, &f.period.period_id)
            .unwrap()
            .unwrap();
        assert_eq!(balance.consumed, 42);
        assert_eq!(balance.included_allowance, 1000);
    }

    #[test]
    fn lifecycle_closes_after_grace_and_opens_next() {
        let f = fixture();
        log_event(&f, "e1", 10);
        write_balance(&f, 10);

        // period_end was a day ago: first tick starts closing and opens the
        // next period, but the grace window has not elapsed.
        let just_after_end = f.period.period_end + chrono::Duration::hours(1);
        let summary = f
            .aggregator
            .tick_account(&f.account_id, just_after_end)
            .unwrap();
        assert_eq!(summary.closing_started, 1);
        assert_eq!(summary.closed, 0);
        assert!(summary.opened);

        // Past the grace window the period closes for good.
        let past_grace = f.period.period_end + chrono::Duration::hours(49);
        let summary = f.aggregator.tick_account(&f.account_id, past_grace).unwrap();
        assert_eq!(summary.closed, 1);

        let closed = f
            .store
            .get_period(&f.account_id, &f.period.period_id)
            .unwrap()
            .unwrap();
        assert!(closed.is_closed());
        assert!(closed.closed_at.is_some());
    }

    #[test]
    fn next_period_starts_where_previous_ended() {
        let f = fixture();
        let now = f.period.period_end + chrono::Duration::hours(1);

        f.aggregator.tick_account(&f.account_id, now).unwrap();

        let periods = f.store.list_periods(&f.account_id).unwrap();
        assert_eq!(periods.len(), 2);
        let next = periods
            .iter()
            .find(|p| p.period_id != f.period.period_id)
            .unwrap();
        assert_eq!(next.period_start, f.period.period_end);
        assert!(next.contains(now));
        assert_eq!(next.pinned_plan_id, f.period.pinned_plan_id);
    }

    #[test]
    fn tick_is_idempotent_for_open_coverage() {
        let f = fixture();
        let now = f.period.period_end + chrono::Duration::hours(1);

        assert!(f.aggregator.tick_account(&f.account_id, now).unwrap().opened);
        assert!(!f.aggregator.tick_account(&f.account_id, now).unwrap().opened);
        assert_eq!(f.store.list_periods(&f.account_id).unwrap().len(), 2);
    }

    #[test]
    fn dormant_account_gets_fresh_cycle_start() {
        let f = fixture();

        // Well past the old period plus a month: the new cycle anchors at
        // `now` rather than chaining a year of empty periods.
        let much_later = f.period.period_end + chrono::Duration::days(100);
        f.aggregator.tick_account(&f.account_id, much_later).unwrap();

        let periods = f.store.list_periods(&f.account_id).unwrap();
        let next = periods
            .iter()
            .find(|p| p.period_id != f.period.period_id)
            .unwrap();
        assert_eq!(next.period_start, much_later);
    }
}
