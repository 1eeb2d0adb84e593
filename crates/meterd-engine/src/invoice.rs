//! The invoice builder.
//!
//! Builds invoices for CLOSED periods from aggregated totals and the plan
//! version pinned when the period opened. `preview` is pure and can run at
//! any time; `finalize` is the one-way DRAFT -> FINAL transition that also
//! consumes currency credits, and it is idempotent: a period has at most
//! one invoice and a second finalize, concurrent or later, returns the
//! existing one without applying credits twice.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use meterd_core::{
    pricing, AccountId, BillingPeriod, Credit, CreditScope, Invoice, MeterError, Metric,
    MetricTotal, PeriodId, PricingPlan, Result,
};
use meterd_store::Store;

/// Builds and finalizes invoices.
pub struct InvoiceBuilder<S> {
    store: Arc<S>,
    finalize_lock: Mutex<()>,
}

impl<S: Store> InvoiceBuilder<S> {
    /// Create a builder over the given store.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            finalize_lock: Mutex::new(()),
        }
    }

    /// Compute what the period's invoice would look like right now without
    /// persisting anything or consuming credits.
    ///
    /// # Errors
    ///
    /// - `MeterError::NotFound` if the period does not exist.
    /// - `MeterError::PricingConfigMissing` if no plan version is pinned.
    pub fn preview(&self, account_id: &AccountId, period_id: &PeriodId) -> Result<Invoice> {
        let period = self.load_period(account_id, period_id)?;
        let plan = self.load_pinned_plan(&period)?;

        let (lines, subtotal) = self.price_period(&period, &plan)?;
        let capacity = self.currency_credit_capacity(account_id)?;
        let applied = i64::try_from(capacity).unwrap_or(i64::MAX).min(subtotal);

        Ok(Invoice::draft(*account_id, *period_id, lines, applied))
    }

    /// Finalize the period's invoice: price the aggregated totals under the
    /// pinned plan, draw currency credits against the subtotal, and persist
    /// the FINAL invoice atomically with the credit rows it consumed.
    ///
    /// Idempotent: if the period already has a FINAL (or later) invoice it
    /// is returned as-is, even when two callers race past the first check.
    ///
    /// # Errors
    ///
    /// - `MeterError::InvalidState` if the period is not CLOSED.
    /// - `MeterError::PricingConfigMissing` if no plan version is pinned.
    pub fn finalize(
        &self,
        account_id: &AccountId,
        period_id: &PeriodId,
        now: DateTime<Utc>,
    ) -> Result<Invoice> {
        if let Some(existing) = self.store.get_invoice(account_id, period_id)? {
            if existing.is_final() {
                return Ok(existing);
            }
        }

        // The billing cycle job and the admin endpoint can both land here;
        // credits must be drawn exactly once per invoice, so finalization
        // serializes and re-checks for an invoice stored while waiting.
        let _guard = self
            .finalize_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = self.store.get_invoice(account_id, period_id)? {
            if existing.is_final() {
                return Ok(existing);
            }
        }

        let period = self.load_period(account_id, period_id)?;
        if !period.is_closed() {
            return Err(MeterError::InvalidState(format!(
                "period {period_id} is not closed; cannot finalize its invoice"
            )));
        }
        let plan = self.load_pinned_plan(&period)?;

        let (lines, subtotal) = self.price_period(&period, &plan)?;

        // Draw currency credits FIFO-by-expiry up to the subtotal.
        let mut touched = Vec::new();
        let mut applied: i64 = 0;
        if subtotal > 0 {
            let mut remaining = u64::try_from(subtotal).unwrap_or(0);
            for mut credit in self.usable_currency_credits(account_id, now)? {
                if remaining == 0 {
                    break;
                }
                let taken = credit.draw(remaining);
                if taken > 0 {
                    remaining -= taken;
                    applied += i64::try_from(taken).unwrap_or(i64::MAX);
                    touched.push(credit);
                }
            }
        }

        let mut invoice = Invoice::draft(*account_id, *period_id, lines, applied);
        invoice.finalize(now);

        self.store.apply_invoice(&invoice, &touched)?;

        tracing::info!(
            account_id = %account_id,
            period_id = %period_id,
            invoice_id = %invoice.invoice_id,
            subtotal_cents = %invoice.subtotal_cents,
            credits_applied_cents = %invoice.credits_applied_cents,
            total_cents = %invoice.total_cents,
            "Invoice finalized"
        );

        Ok(invoice)
    }

    /// Attach the payment collaborator's reference to a FINAL invoice.
    ///
    /// # Errors
    ///
    /// - `MeterError::NotFound` if the period has no invoice.
    /// - `MeterError::InvalidState` if the invoice is still a draft.
    pub fn attach_external_ref(
        &self,
        account_id: &AccountId,
        period_id: &PeriodId,
        external_ref: impl Into<String>,
    ) -> Result<Invoice> {
        let mut invoice = self
            .store
            .get_invoice(account_id, period_id)?
            .ok_or_else(|| MeterError::NotFound {
                entity: "invoice",
                id: period_id.to_string(),
            })?;

        if !invoice.is_final() {
            return Err(MeterError::InvalidState(
                "cannot attach a payment reference to a draft invoice".into(),
            ));
        }

        invoice.external_ref = Some(external_ref.into());
        self.store.put_invoice(&invoice)?;
        Ok(invoice)
    }

    /// Record the payment collaborator's terminal verdict for the invoice
    /// carrying `external_ref`. FINAL -> PAID/FAILED, one way.
    ///
    /// # Errors
    ///
    /// - `MeterError::NotFound` if no invoice carries the reference.
    /// - `MeterError::InvalidState` if the invoice is not FINAL.
    pub fn record_payment(&self, external_ref: &str, paid: bool) -> Result<Invoice> {
        let mut invoice = self
            .store
            .get_invoice_by_ref(external_ref)?
            .ok_or_else(|| MeterError::NotFound {
                entity: "invoice",
                id: external_ref.to_string(),
            })?;

        if !invoice.record_payment(paid) {
            return Err(MeterError::InvalidState(format!(
                "invoice {} is not awaiting payment",
                invoice.invoice_id
            )));
        }

        self.store.put_invoice(&invoice)?;

        tracing::info!(
            invoice_id = %invoice.invoice_id,
            external_ref = %external_ref,
            paid = %paid,
            "Payment outcome recorded"
        );

        Ok(invoice)
    }

    /// The stored invoice for a period, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get(&self, account_id: &AccountId, period_id: &PeriodId) -> Result<Option<Invoice>> {
        Ok(self.store.get_invoice(account_id, period_id)?)
    }

    fn load_period(&self, account_id: &AccountId, period_id: &PeriodId) -> Result<BillingPeriod> {
        self.store
            .get_period(account_id, period_id)?
            .ok_or_else(|| MeterError::NotFound {
                entity: "period",
                id: period_id.to_string(),
            })
    }

    fn load_pinned_plan(&self, period: &BillingPeriod) -> Result<PricingPlan> {
        let plan_id = period
            .pinned_plan_id
            .ok_or_else(|| MeterError::PricingConfigMissing {
                period_id: period.period_id.to_string(),
            })?;
        self.store
            .get_plan(&plan_id)?
            .ok_or_else(|| MeterError::PricingConfigMissing {
                period_id: period.period_id.to_string(),
            })
    }

    /// Price the period's aggregated totals, returning the lines and the
    /// subtotal in cents.
    fn price_period(
        &self,
        period: &BillingPeriod,
        plan: &PricingPlan,
    ) -> Result<(Vec<meterd_core::InvoiceLine>, i64)> {
        let mut totals = Vec::new();
        for metric in Metric::ALL {
            let Some(total) =
                self.store
                    .get_period_total(&period.account_id, metric, &period.period_id)?
            else {
                continue;
            };
            let credit_units_applied = self
                .store
                .get_balance(&period.account_id, metric, &period.period_id)?
                .map_or(0, |b| b.credit_units_applied);

            totals.push(MetricTotal {
                metric,
                total: total.total_quantity,
                credit_units_applied,
            });
        }

        let lines = pricing::price(plan, &totals);
        let subtotal = lines.iter().map(|l| l.amount_cents).sum();
        Ok((lines, subtotal))
    }

    fn usable_currency_credits(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Credit>> {
        let credits = self.store.list_credits(account_id)?;
        Ok(credits
            .into_iter()
            .filter(|c| c.scope == CreditScope::Currency && !c.is_expired(now) && c.remaining > 0)
            .collect())
    }

    fn currency_credit_capacity(&self, account_id: &AccountId) -> Result<u64> {
        Ok(self
            .usable_currency_credits(account_id, Utc::now())?
            .iter()
            .map(|c| c.remaining)
            .sum())
    }
}
