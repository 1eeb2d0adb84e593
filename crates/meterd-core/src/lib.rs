//! Core types and pricing computation for meterd.
//!
//! This crate provides the foundational types used throughout the meterd
//! platform:
//!
//! - **Identifiers**: `AccountId`, `PlanId`, `PeriodId`, `InvoiceId`, `CreditId`
//! - **Metering**: `Metric`, `UsageEvent`, `QuotaBalance`, `PeriodTotal`
//! - **Billing**: `PricingPlan`, `BillingPeriod`, `Credit`, `Invoice`
//! - **Pricing engine**: the pure [`pricing::price`] function
//!
//! # Monetary units
//!
//! Amounts are stored as `i64` integer cents; plan rates as integer
//! milli-cents per unit (1 cent = 1000 milli-cents). No floating point
//! touches money.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod balance;
pub mod credit;
pub mod error;
pub mod event;
pub mod ids;
pub mod invoice;
pub mod metric;
pub mod period;
pub mod plan;
pub mod pricing;

pub use account::Account;
pub use balance::{DebitRecord, PeriodTotal, QuotaBalance};
pub use credit::{Credit, CreditScope};
pub use error::{MeterError, Result};
pub use event::{FlaggedEvent, UsageEvent};
pub use ids::{AccountId, CreditId, IdError, InvoiceId, PeriodId, PlanId};
pub use invoice::{Invoice, InvoiceLine, InvoiceStatus};
pub use metric::{Metric, UnknownMetric};
pub use period::{BillingPeriod, PeriodStatus};
pub use plan::{MetricRates, PlanTier, PricingPlan};
pub use pricing::MetricTotal;
