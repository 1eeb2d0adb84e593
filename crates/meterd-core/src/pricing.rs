//! The pricing engine.
//!
//! `price` is a pure function of the plan version pinned to the period and
//! the aggregated totals: identical inputs always yield identical invoice
//! lines, which makes re-pricing for audits deterministic.
//!
//! Rounding: line amounts are computed exactly in milli-cents and rounded to
//! whole cents **once per line** with round-half-even. Rounding per unit
//! would accumulate drift across large quantities.

use serde::{Deserialize, Serialize};

use crate::{InvoiceLine, Metric, PricingPlan};

/// Aggregated input for pricing one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTotal {
    /// The metered resource.
    pub metric: Metric,

    /// Total admitted units for the period.
    pub total: u64,

    /// Units of the total that were covered by metric-scoped credits.
    pub credit_units_applied: u64,
}

/// Price aggregated totals under a pinned plan version.
///
/// Credit-covered units are removed before the allowance split:
/// `billable = total - credit_units_applied`,
/// `quantity_included = min(billable, allowance)`,
/// `quantity_overage = billable - quantity_included`. The included portion is
/// free unless the plan defines a flat per-unit rate below the threshold.
/// Metrics with zero total produce no line.
#[must_use]
pub fn price(plan: &PricingPlan, totals: &[MetricTotal]) -> Vec<InvoiceLine> {
    let mut lines: Vec<InvoiceLine> = totals
        .iter()
        .filter(|t| t.total > 0)
        .map(|t| price_line(plan, *t))
        .collect();

    // Stable output order regardless of input order.
    lines.sort_by_key(|l| l.metric.as_byte());
    lines
}

fn price_line(plan: &PricingPlan, total: MetricTotal) -> InvoiceLine {
    let rates = plan.rates_for(total.metric);

    let billable = total.total.saturating_sub(total.credit_units_applied);
    let quantity_included = billable.min(rates.included_allowance);
    let quantity_overage = billable - quantity_included;

    let mut amount_millicents =
        i128::from(quantity_overage) * i128::from(rates.overage_rate_millicents);
    if let Some(unit_rate) = rates.unit_rate_millicents {
        amount_millicents += i128::from(quantity_included) * i128::from(unit_rate);
    }

    InvoiceLine {
        metric: total.metric,
        quantity_included,
        quantity_overage,
        rate_applied_millicents: rates.overage_rate_millicents,
        amount_cents: round_millicents_to_cents(amount_millicents),
    }
}

/// Round a non-negative milli-cent amount to whole cents, half to even.
#[allow(clippy::cast_possible_truncation)]
fn round_millicents_to_cents(millicents: i128) -> i64 {
    debug_assert!(millicents >= 0, "line amounts are non-negative");

    let quotient = millicents / 1000;
    let remainder = millicents % 1000;

    let rounded = match remainder.cmp(&500) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal => {
            if quotient % 2 == 0 {
                quotient
            } else {
                quotient + 1
            }
        }
    };

    i64::try_from(rounded).unwrap_or(i64::MAX)
}
