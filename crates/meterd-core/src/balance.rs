//! Live quota balances and aggregated period totals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, Metric, PeriodId};

/// The live quota balance for one `(account, metric, period)` tuple.
///
/// This is the only hot mutable row in the system. It is mutated exclusively
/// through the ledger's atomic debit/refund operations; `consumed` counts
/// every admitted unit (including units covered by metric-scoped credits) so
/// that after reconciliation `sum(event.quantity) == consumed` for any closed
/// period. `credit_units_applied` records how many of those units were paid
/// for by credits and is subtracted before pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaBalance {
    /// The account this balance belongs to.
    pub account_id: AccountId,

    /// The metered resource.
    pub metric: Metric,

    /// The billing period this balance covers.
    pub period_id: PeriodId,

    /// Units included free of charge by the pinned plan.
    pub included_allowance: u64,

    /// Total admitted units. Monotonically non-decreasing except for
    /// explicit refunds.
    pub consumed: u64,

    /// Admitted units that were covered by metric-scoped credits.
    pub credit_units_applied: u64,

    /// Cached remaining metric-scoped credit units for this account.
    pub credit_balance: u64,

    /// Allowance-percent thresholds already notified this period.
    pub thresholds_emitted: Vec<u8>,

    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl QuotaBalance {
    /// Create a fresh balance for a period, seeded from the pinned plan's
    /// allowance and the account's current metric-credit balance.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        metric: Metric,
        period_id: PeriodId,
        included_allowance: u64,
        credit_balance: u64,
    ) -> Self {
        Self {
            account_id,
            metric,
            period_id,
            included_allowance,
            consumed: 0,
            credit_units_applied: 0,
            credit_balance,
            thresholds_emitted: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Units that count against the allowance (consumed minus credit-covered).
    #[must_use]
    pub fn billable(&self) -> u64 {
        self.consumed.saturating_sub(self.credit_units_applied)
    }

    /// Allowance units still available before overage begins.
    #[must_use]
    pub fn remaining_allowance(&self) -> u64 {
        self.included_allowance.saturating_sub(self.billable())
    }

    /// Percent of the included allowance currently used. Overage pushes this
    /// past 100 (saturating at 255); zero-allowance balances report 0.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn percent_of_allowance(&self) -> u8 {
        if self.included_allowance == 0 {
            return 0;
        }
        let pct = u128::from(self.billable()) * 100 / u128::from(self.included_allowance);
        pct.min(u128::from(u8::MAX)) as u8
    }
}

/// Authoritative aggregated total for one `(account, metric, period)` tuple.
///
/// Written by the aggregator as an upsert, so re-running aggregation over an
/// unchanged event set is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodTotal {
    /// The account this total belongs to.
    pub account_id: AccountId,

    /// The metered resource.
    pub metric: Metric,

    /// The billing period.
    pub period_id: PeriodId,

    /// Sum of event quantities with `occurred_at` inside the period.
    pub total_quantity: u64,

    /// Number of events aggregated.
    pub event_count: u64,

    /// When this total was last recomputed.
    pub aggregated_at: DateTime<Utc>,
}

/// Stored outcome of an idempotent `check_and_debit` call.
///
/// Keyed by the caller-supplied idempotency key; a retried call replays the
/// stored outcome instead of debiting a second time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebitRecord {
    /// The caller-supplied idempotency key.
    pub idempotency_key: String,

    /// Whether the original call was admitted.
    pub admitted: bool,

    /// Remaining allowance reported by the original call.
    pub remaining_allowance: u64,

    /// When the original call was decided.
    pub decided_at: DateTime<Utc>,
}
