//! Pricing plan versions.
//!
//! Plans are versioned and immutable once effective. An account references
//! the plan version pinned at the start of each billing period, never the
//! plan active at computation time, so later plan edits cannot retroactively
//! change an invoice.
//!
//! # Monetary units
//!
//! Amounts are integer cents; rates are integer **milli-cents per unit**
//! (1 cent = 1000 milli-cents). An overage rate of $0.01 per API call is
//! `1000`. Integer rates keep pricing exact; rounding to cents happens once
//! per invoice line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Metric, PlanId};

// ============================================================================
// Constants
// ============================================================================

/// Basic tier included API calls per period.
pub const BASIC_API_CALL_ALLOWANCE: u64 = 1000;

/// Basic tier included reviewed lines per period.
pub const BASIC_LINES_ALLOWANCE: u64 = 50_000;

/// Basic tier included generated documents per period.
pub const BASIC_DOCS_ALLOWANCE: u64 = 100;

/// Default overage rate for API calls: $0.01 per call.
pub const DEFAULT_API_CALL_OVERAGE_MILLICENTS: i64 = 1000;

/// Default overage rate for reviewed lines: $0.0001 per line.
pub const DEFAULT_LINES_OVERAGE_MILLICENTS: i64 = 10;

/// Default overage rate for generated documents: $0.25 per document.
pub const DEFAULT_DOCS_OVERAGE_MILLICENTS: i64 = 25_000;

/// Per-metric rate configuration within a plan version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRates {
    /// Units included free of charge each period.
    pub included_allowance: u64,

    /// Optional flat per-unit rate applied to the included portion, in
    /// milli-cents. Most plans leave this unset (included usage is free).
    pub unit_rate_millicents: Option<i64>,

    /// Rate applied to units beyond the allowance, in milli-cents per unit.
    pub overage_rate_millicents: i64,
}

impl MetricRates {
    /// Rates with everything zero: no allowance, no charge.
    pub const ZERO: MetricRates = MetricRates {
        included_allowance: 0,
        unit_rate_millicents: None,
        overage_rate_millicents: 0,
    };
}

/// Plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    /// Entry tier. Overage is forbidden: requests beyond the allowance are
    /// denied at admission rather than priced.
    Basic,

    /// Paid tier with overage billing.
    Pro,

    /// Negotiated enterprise pricing; rate lookup is by `plan_id`, never by
    /// tier name.
    Enterprise,

    /// Bespoke plan outside the standard tiers.
    Custom,
}

/// A versioned pricing plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingPlan {
    /// This plan version's identifier.
    pub plan_id: PlanId,

    /// Human-facing tier label.
    pub tier: PlanTier,

    /// Per-metric allowances and rates.
    pub rates: HashMap<Metric, MetricRates>,

    /// Whether usage beyond the allowance is admitted (and priced later)
    /// or denied at admission time.
    pub allow_overage: bool,

    /// When this version becomes effective.
    pub effective_from: DateTime<Utc>,

    /// When this version stops being effective, if superseded.
    pub effective_to: Option<DateTime<Utc>>,
}

impl PricingPlan {
    /// Build a Basic-tier plan version with the default allowances.
    ///
    /// Basic forbids overage; requests beyond the allowance are denied.
    #[must_use]
    pub fn basic(plan_id: PlanId, effective_from: DateTime<Utc>) -> Self {
        let mut rates = HashMap::new();
        rates.insert(
            Metric::ApiCall,
            MetricRates {
                included_allowance: BASIC_API_CALL_ALLOWANCE,
                unit_rate_millicents: None,
                overage_rate_millicents: DEFAULT_API_CALL_OVERAGE_MILLICENTS,
            },
        );
        rates.insert(
            Metric::LinesReviewed,
            MetricRates {
                included_allowance: BASIC_LINES_ALLOWANCE,
                unit_rate_millicents: None,
                overage_rate_millicents: DEFAULT_LINES_OVERAGE_MILLICENTS,
            },
        );
        rates.insert(
            Metric::DocsGenerated,
            MetricRates {
                included_allowance: BASIC_DOCS_ALLOWANCE,
                unit_rate_millicents: None,
                overage_rate_millicents: DEFAULT_DOCS_OVERAGE_MILLICENTS,
            },
        );

        Self {
            plan_id,
            tier: PlanTier::Basic,
            rates,
            allow_overage: false,
            effective_from,
            effective_to: None,
        }
    }

    /// Build a Pro-tier plan version: same default allowances, overage billed.
    #[must_use]
    pub fn pro(plan_id: PlanId, effective_from: DateTime<Utc>) -> Self {
        let mut plan = Self::basic(plan_id, effective_from);
        plan.tier = PlanTier::Pro;
        plan.allow_overage = true;
        plan
    }

    /// Rates for a metric; metrics the plan does not mention are free with
    /// zero allowance.
    #[must_use]
    pub fn rates_for(&self, metric: Metric) -> &MetricRates {
        self.rates.get(&metric).unwrap_or(&MetricRates::ZERO)
    }

    /// Included allowance for a metric.
    #[must_use]
    pub fn included_allowance(&self, metric: Metric) -> u64 {
        self.rates_for(metric).included_allowance
    }

    /// Whether this version is effective at the given instant.
    #[must_use]
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.effective_from && self.effective_to.map_or(true, |to| at < to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_plan_forbids_overage() {
        let plan = PricingPlan::basic(PlanId::generate(), Utc::now());
        assert_eq!(plan.tier, PlanTier::Basic);
        assert!(!plan.allow_overage);
        assert_eq!(plan.included_allowance(Metric::ApiCall), 1000);
    }

    #[test]
    fn pro_plan_allows_overage() {
        let plan = PricingPlan::pro(PlanId::generate(), Utc::now());
        assert_eq!(plan.tier, PlanTier::Pro);
        assert!(plan.allow_overage);
    }

    #[test]
    fn unknown_metric_rates_are_zero() {
        let mut plan = PricingPlan::pro(PlanId::generate(), Utc::now());
        plan.rates.remove(&Metric::DocsGenerated);

        assert_eq!(plan.rates_for(Metric::DocsGenerated), &MetricRates::ZERO);
        assert_eq!(plan.included_allowance(Metric::DocsGenerated), 0);
    }

    #[test]
    fn effectivity_window() {
        let now = Utc::now();
        let mut plan = PricingPlan::basic(PlanId::generate(), now);
        assert!(plan.is_effective_at(now));
        assert!(!plan.is_effective_at(now - chrono::Duration::seconds(1)));

        plan.effective_to = Some(now + chrono::Duration::days(30));
        assert!(plan.is_effective_at(now + chrono::Duration::days(29)));
        assert!(!plan.is_effective_at(now + chrono::Duration::days(30)));
    }
}
