//! `RocksDB` storage layer for meterd.
//!
//! This crate provides persistent storage for the metering and billing state
//! using `RocksDB` with column families for efficient indexing. Values are
//! CBOR-encoded.
//!
//! # Architecture
//!
//! The event log (`events` + `events_by_period`) is append-only and
//! partitioned by period for archival. Everything else is point-queryable by
//! account. The quota balance row is the only hot mutable record; it is
//! written exclusively through [`Store::apply_ledger_update`], which the
//! engine calls under its per-key lease so that balance mutations are
//! linearized.
//!
//! # Example
//!
//! ```no_run
//! use meterd_store::{RocksStore, Store};
//! use meterd_core::{Account, AccountId};
//!
//! let store = RocksStore::open("/tmp/meterd-db").unwrap();
//!
//! let account = Account::new(AccountId::generate(), None);
//! store.put_account(&account).unwrap();
//!
//! let retrieved = store.get_account(&account.account_id).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};

use meterd_core::{
    Account, AccountId, BillingPeriod, Credit, DebitRecord, FlaggedEvent, Invoice, Metric,
    PeriodId, PeriodTotal, PlanId, PricingPlan, QuotaBalance, UsageEvent,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert or update an account record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_account(&self, account: &Account) -> Result<()>;

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// List all registered accounts (batch-path input).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_accounts(&self) -> Result<Vec<Account>>;

    // =========================================================================
    // Plan Operations
    // =========================================================================

    /// Insert a pricing plan version. Plans are immutable once effective;
    /// callers store new versions rather than editing existing ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_plan(&self, plan: &PricingPlan) -> Result<()>;

    /// Get a plan version by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_plan(&self, plan_id: &PlanId) -> Result<Option<PricingPlan>>;

    // =========================================================================
    // Period Operations
    // =========================================================================

    /// Insert or update a billing period.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_period(&self, period: &BillingPeriod) -> Result<()>;

    /// Get a period by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_period(
        &self,
        account_id: &AccountId,
        period_id: &PeriodId,
    ) -> Result<Option<BillingPeriod>>;

    /// Find the account's period whose window contains `at`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_period_containing(
        &self,
        account_id: &AccountId,
        at: DateTime<Utc>,
    ) -> Result<Option<BillingPeriod>>;

    /// List an account's periods, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_periods(&self, account_id: &AccountId) -> Result<Vec<BillingPeriod>>;

    // =========================================================================
    // Usage Event Operations
    // =========================================================================

    /// Check if a usage event has already been recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn has_event(&self, event_id: &str) -> Result<bool>;

    /// Get a usage event by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_event(&self, event_id: &str) -> Result<Option<UsageEvent>>;

    /// Durably record a usage event and its period-index entry atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateEvent` if the event ID was already recorded.
    fn record_event(&self, event: &UsageEvent, period_id: &PeriodId) -> Result<()>;

    /// List all events attributed to a period (the aggregation scan).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_events_in_period(&self, period_id: &PeriodId) -> Result<Vec<UsageEvent>>;

    // =========================================================================
    // Flagged Event Operations
    // =========================================================================

    /// Store an event rejected after its period closed, for manual review.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_flagged_event(&self, flagged: &FlaggedEvent, period_id: &PeriodId) -> Result<()>;

    /// List flagged events for a period.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_flagged_events(&self, period_id: &PeriodId) -> Result<Vec<FlaggedEvent>>;

    // =========================================================================
    // Balance / Ledger Operations
    // =========================================================================

    /// Get the live balance for `(account, metric, period)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_balance(
        &self,
        account_id: &AccountId,
        metric: Metric,
        period_id: &PeriodId,
    ) -> Result<Option<QuotaBalance>>;

    /// List all balances of an account for one period.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_balances(
        &self,
        account_id: &AccountId,
        period_id: &PeriodId,
    ) -> Result<Vec<QuotaBalance>>;

    /// Atomically write a balance together with the credit rows it drew from
    /// and, for idempotent debits, the stored decision.
    ///
    /// Must only be called by the ledger while holding the lease for the
    /// balance's `(account, metric, period)` key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn apply_ledger_update(
        &self,
        balance: &QuotaBalance,
        credits: &[Credit],
        debit_record: Option<&DebitRecord>,
    ) -> Result<()>;

    /// Look up a stored `check_and_debit` decision by idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_debit_record(&self, idempotency_key: &str) -> Result<Option<DebitRecord>>;

    // =========================================================================
    // Credit Operations
    // =========================================================================

    /// Insert or update a credit grant.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_credit(&self, credit: &Credit) -> Result<()>;

    /// List an account's credits in FIFO-by-expiry order (never-expiring
    /// credits last).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_credits(&self, account_id: &AccountId) -> Result<Vec<Credit>>;

    // =========================================================================
    // Aggregation Operations
    // =========================================================================

    /// Upsert an aggregated period total. Keyed by
    /// `(account, metric, period)`, so re-aggregation overwrites in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn upsert_period_total(&self, total: &PeriodTotal) -> Result<()>;

    /// Get the aggregated total for one metric.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_period_total(
        &self,
        account_id: &AccountId,
        metric: Metric,
        period_id: &PeriodId,
    ) -> Result<Option<PeriodTotal>>;

    /// List all aggregated totals of an account for one period.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_period_totals(
        &self,
        account_id: &AccountId,
        period_id: &PeriodId,
    ) -> Result<Vec<PeriodTotal>>;

    // =========================================================================
    // Invoice Operations
    // =========================================================================

    /// Insert or update an invoice, maintaining the external-ref index when
    /// the invoice carries one.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_invoice(&self, invoice: &Invoice) -> Result<()>;

    /// Get the invoice for a period, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_invoice(
        &self,
        account_id: &AccountId,
        period_id: &PeriodId,
    ) -> Result<Option<Invoice>>;

    /// Look up an invoice by the payment collaborator's reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_invoice_by_ref(&self, external_ref: &str) -> Result<Option<Invoice>>;

    /// Atomically write a finalized invoice together with the currency
    /// credit rows it consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn apply_invoice(&self, invoice: &Invoice, credits: &[Credit]) -> Result<()>;
}
