//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use meterd_core::{
    Account, AccountId, BillingPeriod, Credit, DebitRecord, FlaggedEvent, Invoice, Metric,
    PeriodId, PeriodTotal, PlanId, PricingPlan, QuotaBalance, UsageEvent,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Point-get a CBOR value from a column family.
    fn get_value<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Put a CBOR value into a column family.
    fn put_value<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let data = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, data)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Collect all CBOR values under a key prefix in key order.
    fn scan_prefix<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        prefix: &[u8],
    ) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, rocksdb::Direction::Forward));

        let mut values = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(Self::deserialize(&value)?);
        }
        Ok(values)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn put_account(&self, account: &Account) -> Result<()> {
        self.put_value(cf::ACCOUNTS, &keys::account_key(&account.account_id), account)
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get_value(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        let mut accounts = Vec::new();
        for item in iter {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            accounts.push(Self::deserialize(&value)?);
        }
        Ok(accounts)
    }

    // =========================================================================
    // Plan Operations
    // =========================================================================

    fn put_plan(&self, plan: &PricingPlan) -> Result<()> {
        self.put_value(cf::PLANS, &keys::plan_key(&plan.plan_id), plan)
    }

    fn get_plan(&self, plan_id: &PlanId) -> Result<Option<PricingPlan>> {
        self.get_value(cf::PLANS, &keys::plan_key(plan_id))
    }

    // =========================================================================
    // Period Operations
    // =========================================================================

    fn put_period(&self, period: &BillingPeriod) -> Result<()> {
        self.put_value(
            cf::PERIODS,
            &keys::period_key(&period.account_id, &period.period_id),
            period,
        )
    }

    fn get_period(
        &self,
        account_id: &AccountId,
        period_id: &PeriodId,
    ) -> Result<Option<BillingPeriod>> {
        self.get_value(cf::PERIODS, &keys::period_key(account_id, period_id))
    }

    fn find_period_containing(
        &self,
        account_id: &AccountId,
        at: DateTime<Utc>,
    ) -> Result<Option<BillingPeriod>> {
        // Accounts hold a handful of periods; a prefix scan is fine.
        let periods: Vec<BillingPeriod> =
            self.scan_prefix(cf::PERIODS, &keys::account_periods_prefix(account_id))?;
        Ok(periods.into_iter().find(|p| p.contains(at)))
    }

    fn list_periods(&self, account_id: &AccountId) -> Result<Vec<BillingPeriod>> {
        self.scan_prefix(cf::PERIODS, &keys::account_periods_prefix(account_id))
    }

    // =========================================================================
    // Usage Event Operations
    // =========================================================================

    fn has_event(&self, event_id: &str) -> Result<bool> {
        let cf = self.cf(cf::EVENTS)?;
        let exists = self
            .db
            .get_cf(&cf, keys::event_key(event_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        Ok(exists)
    }

    fn get_event(&self, event_id: &str) -> Result<Option<UsageEvent>> {
        self.get_value(cf::EVENTS, &keys::event_key(event_id))
    }

    fn record_event(&self, event: &UsageEvent, period_id: &PeriodId) -> Result<()> {
        if self.has_event(&event.event_id)? {
            return Err(StoreError::DuplicateEvent {
                event_id: event.event_id.clone(),
            });
        }

        let cf_events = self.cf(cf::EVENTS)?;
        let cf_index = self.cf(cf::EVENTS_BY_PERIOD)?;

        let event_value = Self::serialize(event)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_events, keys::event_key(&event.event_id), &event_value);
        batch.put_cf(
            &cf_index,
            keys::event_period_key(period_id, &event.event_id),
            [], // Index entry (empty value)
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn list_events_in_period(&self, period_id: &PeriodId) -> Result<Vec<UsageEvent>> {
        let cf_index = self.cf(cf::EVENTS_BY_PERIOD)?;
        let prefix = keys::period_events_prefix(period_id);
        let iter = self.db.iterator_cf(
            &cf_index,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        let mut events = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }

            let event_id = keys::extract_event_id_from_period_key(&key);
            if let Some(event) = self.get_event(&event_id)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    // =========================================================================
    // Flagged Event Operations
    // =========================================================================

    fn put_flagged_event(&self, flagged: &FlaggedEvent, period_id: &PeriodId) -> Result<()> {
        self.put_value(
            cf::FLAGGED_EVENTS,
            &keys::event_period_key(period_id, &flagged.event.event_id),
            flagged,
        )
    }

    fn list_flagged_events(&self, period_id: &PeriodId) -> Result<Vec<FlaggedEvent>> {
        self.scan_prefix(cf::FLAGGED_EVENTS, &keys::period_events_prefix(period_id))
    }

    // =========================================================================
    // Balance / Ledger Operations
    // =========================================================================

    fn get_balance(
        &self,
        account_id: &AccountId,
        metric: Metric,
        period_id: &PeriodId,
    ) -> Result<Option<QuotaBalance>> {
        self.get_value(cf::BALANCES, &keys::balance_key(account_id, metric, period_id))
    }

    fn list_balances(
        &self,
        account_id: &AccountId,
        period_id: &PeriodId,
    ) -> Result<Vec<QuotaBalance>> {
        let all: Vec<QuotaBalance> =
            self.scan_prefix(cf::BALANCES, account_id.as_bytes().as_slice())?;
        Ok(all.into_iter().filter(|b| b.period_id == *period_id).collect())
    }

    fn apply_ledger_update(
        &self,
        balance: &QuotaBalance,
        credits: &[Credit],
        debit_record: Option<&DebitRecord>,
    ) -> Result<()> {
        let cf_balances = self.cf(cf::BALANCES)?;
        let cf_credits = self.cf(cf::CREDITS)?;
        let cf_records = self.cf(cf::DEBIT_RECORDS)?;

        let balance_key =
            keys::balance_key(&balance.account_id, balance.metric, &balance.period_id);
        let balance_value = Self::serialize(balance)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_balances, &balance_key, &balance_value);

        for credit in credits {
            let value = Self::serialize(credit)?;
            batch.put_cf(&cf_credits, keys::credit_key_for(credit), &value);
        }

        if let Some(record) = debit_record {
            let value = Self::serialize(record)?;
            batch.put_cf(
                &cf_records,
                keys::debit_record_key(&record.idempotency_key),
                &value,
            );
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_debit_record(&self, idempotency_key: &str) -> Result<Option<DebitRecord>> {
        self.get_value(cf::DEBIT_RECORDS, &keys::debit_record_key(idempotency_key))
    }

    // =========================================================================
    // Credit Operations
    // =========================================================================

    fn put_credit(&self, credit: &Credit) -> Result<()> {
        self.put_value(cf::CREDITS, &keys::credit_key_for(credit), credit)
    }

    fn list_credits(&self, account_id: &AccountId) -> Result<Vec<Credit>> {
        self.scan_prefix(cf::CREDITS, &keys::account_credits_prefix(account_id))
    }

    // =========================================================================
    // Aggregation Operations
    // =========================================================================

    fn upsert_period_total(&self, total: &PeriodTotal) -> Result<()> {
        self.put_value(
            cf::PERIOD_TOTALS,
            &keys::total_key(&total.account_id, total.metric, &total.period_id),
            total,
        )
    }

    fn get_period_total(
        &self,
        account_id: &AccountId,
        metric: Metric,
        period_id: &PeriodId,
    ) -> Result<Option<PeriodTotal>> {
        self.get_value(
            cf::PERIOD_TOTALS,
            &keys::total_key(account_id, metric, period_id),
        )
    }

    fn list_period_totals(
        &self,
        account_id: &AccountId,
        period_id: &PeriodId,
    ) -> Result<Vec<PeriodTotal>> {
        let all: Vec<PeriodTotal> =
            self.scan_prefix(cf::PERIOD_TOTALS, account_id.as_bytes().as_slice())?;
        Ok(all.into_iter().filter(|t| t.period_id == *period_id).collect())
    }

    // =========================================================================
    // Invoice Operations
    // =========================================================================

    fn put_invoice(&self, invoice: &Invoice) -> Result<()> {
        let cf_invoices = self.cf(cf::INVOICES)?;
        let cf_by_ref = self.cf(cf::INVOICES_BY_REF)?;

        let invoice_key = keys::invoice_key(&invoice.account_id, &invoice.period_id);
        let invoice_value = Self::serialize(invoice)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_invoices, &invoice_key, &invoice_value);
        if let Some(external_ref) = &invoice.external_ref {
            batch.put_cf(&cf_by_ref, keys::invoice_ref_key(external_ref), &invoice_key);
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_invoice(
        &self,
        account_id: &AccountId,
        period_id: &PeriodId,
    ) -> Result<Option<Invoice>> {
        self.get_value(cf::INVOICES, &keys::invoice_key(account_id, period_id))
    }

    fn get_invoice_by_ref(&self, external_ref: &str) -> Result<Option<Invoice>> {
        let cf_by_ref = self.cf(cf::INVOICES_BY_REF)?;
        let invoice_key = self
            .db
            .get_cf(&cf_by_ref, keys::invoice_ref_key(external_ref))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        match invoice_key {
            Some(key) => self.get_value(cf::INVOICES, &key),
            None => Ok(None),
        }
    }

    fn apply_invoice(&self, invoice: &Invoice, credits: &[Credit]) -> Result<()> {
        let cf_invoices = self.cf(cf::INVOICES)?;
        let cf_by_ref = self.cf(cf::INVOICES_BY_REF)?;
        let cf_credits = self.cf(cf::CREDITS)?;

        let invoice_key = keys::invoice_key(&invoice.account_id, &invoice.period_id);
        let invoice_value = Self::serialize(invoice)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_invoices, &invoice_key, &invoice_value);
        if let Some(external_ref) = &invoice.external_ref {
            batch.put_cf(&cf_by_ref, keys::invoice_ref_key(external_ref), &invoice_key);
        }
        for credit in credits {
            let value = Self::serialize(credit)?;
            batch.put_cf(&cf_credits, keys::credit_key_for(credit), &value);
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}
