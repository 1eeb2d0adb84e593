//! Billing period lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, PeriodId, PlanId};

/// Billing period state machine: OPEN → CLOSING → CLOSED, one way only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    /// Accepting admission checks and new usage debits.
    Open,

    /// Past its end: accepts late reconciliation but no new admission checks.
    Closing,

    /// Immutable. Late events are flagged for manual review, never applied.
    Closed,
}

/// One billing cycle window for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingPeriod {
    /// Time-ordered period identifier.
    pub period_id: PeriodId,

    /// The account this period belongs to.
    pub account_id: AccountId,

    /// Inclusive start of the window.
    pub period_start: DateTime<Utc>,

    /// Exclusive end of the window.
    pub period_end: DateTime<Utc>,

    /// Current lifecycle state.
    pub status: PeriodStatus,

    /// Plan version pinned when the period opened. Pricing always uses this
    /// version; `None` blocks invoicing with `PricingConfigMissing`.
    pub pinned_plan_id: Option<PlanId>,

    /// When the period was closed, if it has been.
    pub closed_at: Option<DateTime<Utc>>,
}

impl BillingPeriod {
    /// Open a new period, pinning the account's current plan version.
    #[must_use]
    pub fn open(
        account_id: AccountId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        pinned_plan_id: Option<PlanId>,
    ) -> Self {
        Self {
            period_id: PeriodId::generate(),
            account_id,
            period_start,
            period_end,
            status: PeriodStatus::Open,
            pinned_plan_id,
            closed_at: None,
        }
    }

    /// Whether an instant falls inside this period's window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.period_start && at < self.period_end
    }

    /// Whether the period accepts new admission checks.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == PeriodStatus::Open
    }

    /// Whether the period is immutable.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status == PeriodStatus::Closed
    }

    /// Transition OPEN → CLOSING. Returns whether the transition happened.
    pub fn begin_closing(&mut self) -> bool {
        if self.status == PeriodStatus::Open {
            self.status = PeriodStatus::Closing;
            true
        } else {
            false
        }
    }

    /// Transition CLOSING → CLOSED. Returns whether the transition happened.
    pub fn close(&mut self, at: DateTime<Utc>) -> bool {
        if self.status == PeriodStatus::Closing {
            self.status = PeriodStatus::Closed;
            self.closed_at = Some(at);
            true
        } else {
            false
        }
    }
}
