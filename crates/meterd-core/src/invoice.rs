//! Invoice records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, InvoiceId, Metric, PeriodId};

/// One priced metric on an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    /// The metered resource.
    pub metric: Metric,

    /// Units covered by the plan's included allowance.
    pub quantity_included: u64,

    /// Units billed at the overage rate.
    pub quantity_overage: u64,

    /// The overage rate applied, in milli-cents per unit.
    pub rate_applied_millicents: i64,

    /// Line amount in cents, rounded half-even once for the whole line.
    pub amount_cents: i64,
}

/// Invoice lifecycle: DRAFT → FINAL → PAID/FAILED, one way only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Under construction; not yet communicated anywhere.
    Draft,

    /// Immutable; handed to the payment collaborator.
    Final,

    /// Payment collaborator reported successful collection.
    Paid,

    /// Payment collaborator reported failed collection. The period stays
    /// closed; dunning is external.
    Failed,
}

/// A billing-period invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique, time-ordered invoice identifier.
    pub invoice_id: InvoiceId,

    /// The account billed.
    pub account_id: AccountId,

    /// The period billed. At most one invoice exists per period.
    pub period_id: PeriodId,

    /// Priced lines, one per metric with usage.
    pub lines: Vec<InvoiceLine>,

    /// Currency credits applied to the summed total, in cents.
    pub credits_applied_cents: i64,

    /// Sum of line amounts before credits, in cents.
    pub subtotal_cents: i64,

    /// Amount due after credits. Never negative.
    pub total_cents: i64,

    /// Lifecycle state.
    pub status: InvoiceStatus,

    /// Reference assigned by the payment collaborator on submission.
    pub external_ref: Option<String>,

    /// When the invoice was created.
    pub created_at: DateTime<Utc>,

    /// When the invoice became FINAL, if it has.
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// Assemble a draft invoice from priced lines and an applied-credit
    /// amount. The total is clamped at zero; a credit cannot take an invoice
    /// negative.
    #[must_use]
    pub fn draft(
        account_id: AccountId,
        period_id: PeriodId,
        lines: Vec<InvoiceLine>,
        credits_applied_cents: i64,
    ) -> Self {
        let subtotal_cents: i64 = lines.iter().map(|l| l.amount_cents).sum();
        let total_cents = (subtotal_cents - credits_applied_cents).max(0);

        Self {
            invoice_id: InvoiceId::generate(),
            account_id,
            period_id,
            lines,
            credits_applied_cents,
            subtotal_cents,
            total_cents,
            status: InvoiceStatus::Draft,
            external_ref: None,
            created_at: Utc::now(),
            finalized_at: None,
        }
    }

    /// Whether the invoice has reached FINAL or a terminal payment state.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.status != InvoiceStatus::Draft
    }

    /// Transition DRAFT → FINAL. Returns whether the transition happened.
    pub fn finalize(&mut self, at: DateTime<Utc>) -> bool {
        if self.status == InvoiceStatus::Draft {
            self.status = InvoiceStatus::Final;
            self.finalized_at = Some(at);
            true
        } else {
            false
        }
    }

    /// Record the payment collaborator's terminal verdict. Only valid from
    /// FINAL; returns whether the transition happened.
    pub fn record_payment(&mut self, paid: bool) -> bool {
        if self.status == InvoiceStatus::Final {
            self.status = if paid {
                InvoiceStatus::Paid
            } else {
                InvoiceStatus::Failed
            };
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(amount_cents: i64) -> InvoiceLine {
        InvoiceLine {
            metric: Metric::ApiCall,
            quantity_included: 1000,
            quantity_overage: 200,
            rate_applied_millicents: 1000,
            amount_cents,
        }
    }

    #[test]
    fn draft_sums_lines() {
        let inv = Invoice::draft(
            AccountId::generate(),
            PeriodId::generate(),
            vec![line(200), line(100)],
            0,
        );
        assert_eq!(inv.subtotal_cents, 300);
        assert_eq!(inv.total_cents, 300);
        assert_eq!(inv.status, InvoiceStatus::Draft);
    }

    #[test]
    fn credits_never_take_total_negative() {
        let inv = Invoice::draft(
            AccountId::generate(),
            PeriodId::generate(),
            vec![line(300)],
            500,
        );
        assert_eq!(inv.total_cents, 0);
        assert_eq!(inv.credits_applied_cents, 500);
    }

    #[test]
    fn lifecycle_transitions() {
        let mut inv = Invoice::draft(AccountId::generate(), PeriodId::generate(), vec![], 0);

        assert!(!inv.record_payment(true)); // not FINAL yet

        let now = Utc::now();
        assert!(inv.finalize(now));
        assert!(!inv.finalize(now)); // one way
        assert_eq!(inv.finalized_at, Some(now));

        assert!(inv.record_payment(false));
        assert_eq!(inv.status, InvoiceStatus::Failed);
        assert!(!inv.record_payment(true)); // terminal
    }
}
