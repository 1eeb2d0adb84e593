//! Database schema definitions and column families.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Account records, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Pricing plan versions, keyed by `plan_id`.
    pub const PLANS: &str = "plans";

    /// Billing periods, keyed by `account_id || period_id`.
    /// `PeriodId` is a ULID, so an account's periods iterate chronologically.
    pub const PERIODS: &str = "periods";

    /// Usage events (append-only log), keyed by `event_id`.
    pub const EVENTS: &str = "events";

    /// Index: events by period, keyed by `period_id || event_id`.
    /// Value is empty (index only). This is the aggregation scan path and the
    /// per-period partitioning boundary for archival.
    pub const EVENTS_BY_PERIOD: &str = "events_by_period";

    /// Events rejected after their period closed, keyed by
    /// `period_id || event_id`, awaiting manual review.
    pub const FLAGGED_EVENTS: &str = "flagged_events";

    /// Live quota balances, keyed by `account_id || metric || period_id`.
    pub const BALANCES: &str = "balances";

    /// Stored `check_and_debit` outcomes, keyed by idempotency key.
    pub const DEBIT_RECORDS: &str = "debit_records";

    /// Credit grants, keyed by `account_id || expiry || credit_id` so that
    /// iteration order is FIFO-by-expiry (never-expiring credits sort last).
    pub const CREDITS: &str = "credits";

    /// Aggregated period totals (upserts), keyed by
    /// `account_id || metric || period_id`.
    pub const PERIOD_TOTALS: &str = "period_totals";

    /// Invoices, keyed by `account_id || period_id` — at most one per period.
    pub const INVOICES: &str = "invoices";

    /// Index: invoice key by payment-collaborator reference.
    pub const INVOICES_BY_REF: &str = "invoices_by_ref";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::PLANS,
        cf::PERIODS,
        cf::EVENTS,
        cf::EVENTS_BY_PERIOD,
        cf::FLAGGED_EVENTS,
        cf::BALANCES,
        cf::DEBIT_RECORDS,
        cf::CREDITS,
        cf::PERIOD_TOTALS,
        cf::INVOICES,
        cf::INVOICES_BY_REF,
    ]
}
