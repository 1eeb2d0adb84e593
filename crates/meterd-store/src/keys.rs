//! Key encoding utilities for `RocksDB`.
//!
//! Composite keys concatenate fixed-width components (16-byte UUIDs/ULIDs,
//! 1-byte metric tags, 8-byte big-endian expiry) so that prefix iteration
//! yields the orderings the engine relies on.

use chrono::{DateTime, Utc};

use meterd_core::{AccountId, Credit, CreditId, Metric, PeriodId, PlanId};

/// Expiry component for credits that never expire; sorts after every
/// real timestamp.
const NO_EXPIRY: u64 = u64::MAX;

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a plan key from a plan ID.
#[must_use]
pub fn plan_key(plan_id: &PlanId) -> Vec<u8> {
    plan_id.as_bytes().to_vec()
}

/// Create a period key.
///
/// Format: `account_id (16) || period_id (16)`. ULIDs are time-ordered, so
/// an account's periods iterate chronologically.
#[must_use]
pub fn period_key(account_id: &AccountId, period_id: &PeriodId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&period_id.to_bytes());
    key
}

/// Prefix for iterating all periods of an account.
#[must_use]
pub fn account_periods_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a usage event key from an event ID (the idempotency key).
#[must_use]
pub fn event_key(event_id: &str) -> Vec<u8> {
    event_id.as_bytes().to_vec()
}

/// Create an event-by-period index key.
///
/// Format: `period_id (16) || event_id (variable)`.
#[must_use]
pub fn event_period_key(period_id: &PeriodId, event_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + event_id.len());
    key.extend_from_slice(&period_id.to_bytes());
    key.extend_from_slice(event_id.as_bytes());
    key
}

/// Prefix for iterating all events attributed to a period.
#[must_use]
pub fn period_events_prefix(period_id: &PeriodId) -> Vec<u8> {
    period_id.to_bytes().to_vec()
}

/// Extract the event ID from an event-by-period index key.
///
/// # Panics
///
/// Panics if the key is shorter than the 16-byte period prefix or the
/// suffix is not UTF-8; both would mean a corrupted index.
#[must_use]
pub fn extract_event_id_from_period_key(key: &[u8]) -> String {
    String::from_utf8(key[16..].to_vec()).expect("event IDs are UTF-8")
}

/// Create a balance key.
///
/// Format: `account_id (16) || metric (1) || period_id (16)`.
#[must_use]
pub fn balance_key(account_id: &AccountId, metric: Metric, period_id: &PeriodId) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.extend_from_slice(account_id.as_bytes());
    key.push(metric.as_byte());
    key.extend_from_slice(&period_id.to_bytes());
    key
}

/// Create a period-total key (same shape as balance keys).
#[must_use]
pub fn total_key(account_id: &AccountId, metric: Metric, period_id: &PeriodId) -> Vec<u8> {
    balance_key(account_id, metric, period_id)
}

/// Create a debit-record key from the caller's idempotency key.
#[must_use]
pub fn debit_record_key(idempotency_key: &str) -> Vec<u8> {
    idempotency_key.as_bytes().to_vec()
}

/// Create a credit key.
///
/// Format: `account_id (16) || expiry_millis (8, big-endian) || credit_id (16)`.
/// Big-endian expiry makes prefix iteration FIFO-by-expiry; credits without
/// an expiry use `u64::MAX` and sort last.
#[must_use]
pub fn credit_key(
    account_id: &AccountId,
    expires_at: Option<DateTime<Utc>>,
    credit_id: &CreditId,
) -> Vec<u8> {
    let expiry = expires_at.map_or(NO_EXPIRY, |at| {
        u64::try_from(at.timestamp_millis()).unwrap_or(0)
    });

    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&expiry.to_be_bytes());
    key.extend_from_slice(&credit_id.to_bytes());
    key
}

/// Create the key for an existing credit row.
#[must_use]
pub fn credit_key_for(credit: &Credit) -> Vec<u8> {
    credit_key(&credit.account_id, credit.expires_at, &credit.credit_id)
}

/// Prefix for iterating all credits of an account (FIFO-by-expiry order).
#[must_use]
pub fn account_credits_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create an invoice key.
///
/// Format: `account_id (16) || period_id (16)` — at most one invoice per
/// period, which is what makes finalize idempotent.
#[must_use]
pub fn invoice_key(account_id: &AccountId, period_id: &PeriodId) -> Vec<u8> {
    period_key(account_id, period_id)
}

/// Create an invoice-by-external-ref index key.
#[must_use]
pub fn invoice_ref_key(external_ref: &str) -> Vec<u8> {
    external_ref.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_key_layout() {
        let account = AccountId::generate();
        let period = PeriodId::generate();
        let key = balance_key(&account, Metric::LinesReviewed, &period);

        assert_eq!(key.len(), 33);
        assert_eq!(&key[..16], account.as_bytes());
        assert_eq!(key[16], Metric::LinesReviewed.as_byte());
        assert_eq!(&key[17..], period.to_bytes());
    }

    #[test]
    fn event_period_key_roundtrip() {
        let period = PeriodId::generate();
        let key = event_period_key(&period, "evt_abc123");

        assert!(key.starts_with(&period_events_prefix(&period)));
        assert_eq!(extract_event_id_from_period_key(&key), "evt_abc123");
    }

    #[test]
    fn credit_keys_order_by_expiry() {
        let account = AccountId::generate();
        let soon = Utc::now();
        let later = soon + chrono::Duration::days(30);

        let k_soon = credit_key(&account, Some(soon), &CreditId::generate());
        let k_later = credit_key(&account, Some(later), &CreditId::generate());
        let k_never = credit_key(&account, None, &CreditId::generate());

        assert!(k_soon < k_later);
        assert!(k_later < k_never);
    }

    #[test]
    fn period_key_layout() {
        let account = AccountId::generate();
        let period = PeriodId::generate();
        let key = period_key(&account, &period);

        assert_eq!(key.len(), 32);
        assert!(key.starts_with(&account_periods_prefix(&account)));
    }
}
