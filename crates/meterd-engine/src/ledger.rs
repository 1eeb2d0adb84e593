//! The quota ledger.
//!
//! `check_and_debit` is the hot admission path: it atomically checks the
//! remaining quota for one `(account, metric, period)` key and debits it.
//! Credit grants are scoped per `(account, metric)` and shared by every
//! period of that key, so mutations are linearized by a sharded lock table
//! keyed on `(account, metric)`: concurrent debits for the same account and
//! metric serialize even when they target different periods (a late event
//! in a grace window and a live request draw from the same grants), while
//! debits against other metrics or accounts proceed in parallel.
//!
//! Consumption order: non-expired metric-scoped credits are drawn
//! first-in-first-out by expiry, then the plan's included allowance, then
//! overage (admitted only when the plan allows it). A request is
//! all-or-nothing; a denied request draws nothing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use meterd_core::{
    AccountId, BillingPeriod, DebitRecord, MeterError, Metric, PeriodId, PricingPlan,
    QuotaBalance, Result,
};
use meterd_store::Store;

/// Number of lock shards. Power of two; collisions only cost contention.
const LOCK_SHARDS: usize = 128;

/// Allowance-percent thresholds that trigger a notification, ascending.
pub const NOTIFY_THRESHOLDS: [u8; 2] = [75, 90];

/// A threshold the balance crossed during a debit. Each fires at most once
/// per `(account, metric, period)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdCrossing {
    /// The account that crossed the threshold.
    pub account_id: AccountId,

    /// The metric whose allowance was consumed.
    pub metric: Metric,

    /// The period the balance belongs to.
    pub period_id: PeriodId,

    /// The threshold crossed (percent of allowance).
    pub threshold: u8,

    /// Percent of allowance used after the debit.
    pub percent: u8,
}

/// Outcome of an admitted `check_and_debit` call.
#[derive(Debug, Clone)]
pub struct DebitOutcome {
    /// Allowance units remaining after the debit.
    pub remaining_allowance: u64,

    /// Units of this request covered by metric-scoped credits.
    pub credit_units_used: u64,

    /// Thresholds crossed by this debit, for notification dispatch.
    pub thresholds_crossed: Vec<ThresholdCrossing>,

    /// Whether this is a stored outcome replayed for a retried
    /// idempotency key rather than a fresh debit.
    pub replayed: bool,
}

/// Outcome of a refund.
#[derive(Debug, Clone, Copy)]
pub struct RefundOutcome {
    /// Units removed from `consumed`. May be less than requested if the
    /// balance held fewer units.
    pub units_refunded: u64,

    /// Of those, units restored onto credit grants.
    pub credit_units_restored: u64,
}

/// The quota ledger. Owns the per-key lock table; all balance and
/// unit-credit mutations go through it.
pub struct QuotaLedger<S> {
    store: std::sync::Arc<S>,
    locks: Box<[Mutex<()>]>,
}

impl<S: Store> QuotaLedger<S> {
    /// Create a ledger over the given store.
    #[must_use]
    pub fn new(store: std::sync::Arc<S>) -> Self {
        let locks = (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect();
        Self { store, locks }
    }

    /// Atomically check quota for `quantity` units and debit on admission.
    ///
    /// When `idempotency_key` is given the decision is stored, and a retried
    /// call with the same key replays the stored outcome instead of debiting
    /// a second time. `enforce` is false only for late events applied during
    /// a period's grace window, where the usage already happened and denial
    /// is meaningless; unenforced debits also skip threshold notifications.
    ///
    /// # Errors
    ///
    /// - `MeterError::AdmissionDenied` if the request exceeds the remaining
    ///   quota and the plan forbids overage.
    /// - `MeterError::PricingConfigMissing` if the period has no pinned plan.
    /// - `MeterError::InvalidQuantity` for zero-quantity requests.
    pub fn check_and_debit(
        &self,
        period: &BillingPeriod,
        metric: Metric,
        quantity: u64,
        idempotency_key: Option<&str>,
        enforce: bool,
    ) -> Result<DebitOutcome> {
        if quantity == 0 {
            return Err(MeterError::InvalidQuantity(
                "quantity must be positive".into(),
            ));
        }

        // Fast path: replay a stored decision without taking the lock.
        if let Some(key) = idempotency_key {
            if let Some(record) = self.store.get_debit_record(key)? {
                return Self::replay(metric, quantity, &record);
            }
        }

        let account_id = period.account_id;
        let plan = self.load_pinned_plan(period, enforce)?;

        let _guard = self.lock(&account_id, metric);

        // The decision may have been stored while we waited on the lock.
        if let Some(key) = idempotency_key {
            if let Some(record) = self.store.get_debit_record(key)? {
                return Self::replay(metric, quantity, &record);
            }
        }

        let now = Utc::now();
        let mut credits = self.usable_credits(&account_id, metric, now)?;
        let credit_capacity: u64 = credits.iter().map(|c| c.remaining).sum();

        let mut balance = match self
            .store
            .get_balance(&account_id, metric, &period.period_id)?
        {
            Some(balance) => balance,
            None => QuotaBalance::new(
                account_id,
                metric,
                period.period_id,
                plan.as_ref().map_or(0, |p| p.included_allowance(metric)),
                credit_capacity,
            ),
        };

        let from_credits = quantity.min(credit_capacity);
        let to_allowance = quantity - from_credits;

        if enforce {
            let allow_overage = plan.as_ref().is_some_and(|p| p.allow_overage);
            let remaining = balance.remaining_allowance();
            if !allow_overage && to_allowance > remaining {
                if let Some(key) = idempotency_key {
                    let record = DebitRecord {
                        idempotency_key: key.to_string(),
                        admitted: false,
                        remaining_allowance: remaining,
                        decided_at: now,
                    };
                    self.store.apply_ledger_update(&balance, &[], Some(&record))?;
                }
                return Err(MeterError::AdmissionDenied {
                    metric,
                    requested: quantity,
                    remaining,
                });
            }
        }

        // Admitted. Draw credits FIFO-by-expiry, then apply the debit.
        let mut want = from_credits;
        let mut touched = Vec::new();
        for credit in &mut credits {
            if want == 0 {
                break;
            }
            let taken = credit.draw(want);
            if taken > 0 {
                want -= taken;
                touched.push(credit.clone());
            }
        }

        let percent_before = balance.percent_of_allowance();
        balance.consumed += quantity;
        balance.credit_units_applied += from_credits;
        balance.credit_balance = credit_capacity - from_credits;
        balance.updated_at = now;
        let percent_after = balance.percent_of_allowance();

        let thresholds_crossed = if enforce {
            Self::crossings(&mut balance, percent_before, percent_after)
        } else {
            Vec::new()
        };

        let remaining_allowance = balance.remaining_allowance();
        let record = idempotency_key.map(|key| DebitRecord {
            idempotency_key: key.to_string(),
            admitted: true,
            remaining_allowance,
            decided_at: now,
        });

        self.store
            .apply_ledger_update(&balance, &touched, record.as_ref())?;

        tracing::debug!(
            account_id = %account_id,
            metric = %metric,
            quantity = %quantity,
            credit_units = %from_credits,
            remaining = %remaining_allowance,
            "Debit admitted"
        );

        Ok(DebitOutcome {
            remaining_allowance,
            credit_units_used: from_credits,
            thresholds_crossed,
            replayed: false,
        })
    }

    /// Refund up to `quantity` previously admitted units.
    ///
    /// The credit-covered portion is restored onto the account's credit
    /// grants (latest expiry first, mirroring the draw order) before the
    /// allowance portion is released. Thresholds already notified stay
    /// notified; crossing a threshold fires at most once per period.
    ///
    /// # Errors
    ///
    /// - `MeterError::NotFound` if no balance exists for the key.
    pub fn refund(
        &self,
        account_id: &AccountId,
        metric: Metric,
        period_id: &PeriodId,
        quantity: u64,
    ) -> Result<RefundOutcome> {
        let _guard = self.lock(account_id, metric);

        let mut balance = self
            .store
            .get_balance(account_id, metric, period_id)?
            .ok_or_else(|| MeterError::NotFound {
                entity: "balance",
                id: format!("{account_id}/{metric}/{period_id}"),
            })?;

        let units = quantity.min(balance.consumed);
        let to_credits = units.min(balance.credit_units_applied);

        let mut restored = 0;
        let mut touched = Vec::new();
        if to_credits > 0 {
            let now = Utc::now();
            let mut credits = self.usable_credits(account_id, metric, now)?;
            for credit in credits.iter_mut().rev() {
                if restored == to_credits {
                    break;
                }
                let put = credit.restore(to_credits - restored);
                if put > 0 {
                    restored += put;
                    touched.push(credit.clone());
                }
            }
        }

        balance.consumed -= units;
        balance.credit_units_applied -= restored;
        balance.credit_balance += restored;
        balance.updated_at = Utc::now();

        self.store.apply_ledger_update(&balance, &touched, None)?;

        tracing::info!(
            account_id = %account_id,
            metric = %metric,
            units = %units,
            credit_units_restored = %restored,
            "Refund applied"
        );

        Ok(RefundOutcome {
            units_refunded: units,
            credit_units_restored: restored,
        })
    }

    /// The live balance for a key, if any usage has been admitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn balance(
        &self,
        account_id: &AccountId,
        metric: Metric,
        period_id: &PeriodId,
    ) -> Result<Option<QuotaBalance>> {
        Ok(self.store.get_balance(account_id, metric, period_id)?)
    }

    // The period stays out of the hash: unit credits are shared across a
    // key's periods and must be mutated under the same lock.
    fn lock(&self, account_id: &AccountId, metric: Metric) -> std::sync::MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        account_id.as_bytes().hash(&mut hasher);
        metric.as_byte().hash(&mut hasher);

        #[allow(clippy::cast_possible_truncation)]
        let shard = (hasher.finish() as usize) % LOCK_SHARDS;
        self.locks[shard]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn load_pinned_plan(
        &self,
        period: &BillingPeriod,
        enforce: bool,
    ) -> Result<Option<PricingPlan>> {
        match period.pinned_plan_id {
            Some(plan_id) => {
                let plan = self.store.get_plan(&plan_id)?;
                if enforce && plan.is_none() {
                    return Err(MeterError::PricingConfigMissing {
                        period_id: period.period_id.to_string(),
                    });
                }
                Ok(plan)
            }
            None if enforce => Err(MeterError::PricingConfigMissing {
                period_id: period.period_id.to_string(),
            }),
            None => Ok(None),
        }
    }

    /// Non-expired metric-scoped credits with units left, FIFO-by-expiry.
    fn usable_credits(
        &self,
        account_id: &AccountId,
        metric: Metric,
        now: DateTime<Utc>,
    ) -> Result<Vec<meterd_core::Credit>> {
        let credits = self.store.list_credits(account_id)?;
        Ok(credits
            .into_iter()
            .filter(|c| c.covers_metric(metric) && !c.is_expired(now) && c.remaining > 0)
            .collect())
    }

    fn crossings(
        balance: &mut QuotaBalance,
        percent_before: u8,
        percent_after: u8,
    ) -> Vec<ThresholdCrossing> {
        let mut crossed = Vec::new();
        for threshold in NOTIFY_THRESHOLDS {
            if percent_after >= threshold
                && percent_before < threshold
                && !balance.thresholds_emitted.contains(&threshold)
            {
                balance.thresholds_emitted.push(threshold);
                crossed.push(ThresholdCrossing {
                    account_id: balance.account_id,
                    metric: balance.metric,
                    period_id: balance.period_id,
                    threshold,
                    percent: percent_after,
                });
            }
        }
        crossed
    }

    fn replay(metric: Metric, quantity: u64, record: &DebitRecord) -> Result<DebitOutcome> {
        if record.admitted {
            Ok(DebitOutcome {
                remaining_allowance: record.remaining_allowance,
                credit_units_used: 0,
                thresholds_crossed: Vec::new(),
                replayed: true,
            })
        } else {
            Err(MeterError::AdmissionDenied {
                metric,
                requested: quantity,
                remaining: record.remaining_allowance,
            })
        }
    }
}
