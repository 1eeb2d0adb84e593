//! HTTP service for meterd: usage metering, quota enforcement, and billing.
//!
//! Exposes the metering surface (check-and-debit, record, refund) behind a
//! service API key, the configuration surface (plans, credits, period
//! lifecycle, invoice finalization) behind an admin key, and a signed
//! webhook endpoint for payment provider callbacks. A background billing
//! cycle drives period close-out and invoice submission.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod notify;
pub mod payments;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use jobs::spawn_billing_cycle;
pub use routes::create_router;
pub use state::AppState;
