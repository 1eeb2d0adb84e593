//! Metering and billing engine for meterd.
//!
//! This crate contains the four moving parts between the HTTP surface and
//! the store:
//!
//! - [`UsageRecorder`]: idempotent durable recording of usage events,
//!   attributed to billing periods by occurrence time.
//! - [`QuotaLedger`]: the atomic `check_and_debit` admission path, credit
//!   consumption, refunds and threshold detection.
//! - [`Aggregator`]: recomputation of authoritative totals from the event
//!   log, balance reconciliation, and the period lifecycle
//!   (OPEN -> CLOSING -> CLOSED plus opening the next cycle).
//! - [`InvoiceBuilder`]: pricing of closed periods under the pinned plan
//!   version, currency-credit application, and the invoice lifecycle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod aggregator;
pub mod invoice;
pub mod ledger;
pub mod recorder;

pub use aggregator::{Aggregator, LifecycleSummary, ReconciliationDelta, DEFAULT_GRACE_HOURS};
pub use invoice::InvoiceBuilder;
pub use ledger::{DebitOutcome, QuotaLedger, RefundOutcome, ThresholdCrossing, NOTIFY_THRESHOLDS};
pub use recorder::{RecordOutcome, UsageRecorder};
