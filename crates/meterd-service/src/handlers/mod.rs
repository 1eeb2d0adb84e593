//! HTTP request handlers.

pub mod accounts;
pub mod credits;
pub mod health;
pub mod invoices;
pub mod periods;
pub mod plans;
pub mod usage;
pub mod webhooks;
