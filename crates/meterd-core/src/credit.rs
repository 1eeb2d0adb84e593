//! Credit grants.
//!
//! Credits come in two scopes: metric-scoped unit credits, consumed by the
//! ledger before the free allowance is touched, and currency credits,
//! applied by the invoice builder to the summed invoice total. Both are
//! consumed first-in-first-out by expiry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, CreditId, Metric};

/// What a credit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CreditScope {
    /// Currency credit in cents, applied to invoice totals.
    Currency,

    /// Unit credit for one metric, applied at admission time.
    Units {
        /// The metric the units cover.
        metric: Metric,
    },
}

/// A credit grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credit {
    /// Unique, time-ordered credit identifier.
    pub credit_id: CreditId,

    /// The account the credit belongs to.
    pub account_id: AccountId,

    /// Currency or metric-unit scope.
    pub scope: CreditScope,

    /// Originally granted amount: cents for currency, units otherwise.
    pub granted: u64,

    /// Amount still available.
    pub remaining: u64,

    /// Expiry instant; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,

    /// Who or what granted the credit (promo code, support ticket, ...).
    pub source: String,

    /// When the credit was granted.
    pub granted_at: DateTime<Utc>,
}

impl Credit {
    /// Grant a currency credit (cents).
    #[must_use]
    pub fn currency(
        account_id: AccountId,
        amount_cents: u64,
        expires_at: Option<DateTime<Utc>>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            credit_id: CreditId::generate(),
            account_id,
            scope: CreditScope::Currency,
            granted: amount_cents,
            remaining: amount_cents,
            expires_at,
            source: source.into(),
            granted_at: Utc::now(),
        }
    }

    /// Grant a metric-scoped unit credit.
    #[must_use]
    pub fn units(
        account_id: AccountId,
        metric: Metric,
        units: u64,
        expires_at: Option<DateTime<Utc>>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            credit_id: CreditId::generate(),
            account_id,
            scope: CreditScope::Units { metric },
            granted: units,
            remaining: units,
            expires_at,
            source: source.into(),
            granted_at: Utc::now(),
        }
    }

    /// Whether the credit is expired at the given instant.
    #[must_use]
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| at >= exp)
    }

    /// Whether the credit can cover anything for the given metric scope.
    #[must_use]
    pub fn covers_metric(&self, metric: Metric) -> bool {
        matches!(self.scope, CreditScope::Units { metric: m } if m == metric)
    }

    /// Draw up to `want` from this credit, returning the amount taken.
    pub fn draw(&mut self, want: u64) -> u64 {
        let take = self.remaining.min(want);
        self.remaining -= take;
        take
    }

    /// Restore previously drawn amount, capped at the granted total.
    /// Returns the amount actually restored.
    pub fn restore(&mut self, amount: u64) -> u64 {
        let room = self.granted - self.remaining;
        let put = room.min(amount);
        self.remaining += put;
        put
    }
}
