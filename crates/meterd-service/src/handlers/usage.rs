//! Usage metering handlers: check-and-debit, record, batch record, refund.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meterd_core::{AccountId, MeterError, Metric, UsageEvent};
use meterd_engine::RecordOutcome;
use meterd_store::Store;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Check-and-debit request.
#[derive(Debug, Deserialize)]
pub struct CheckAndDebitRequest {
    /// Account to debit.
    pub account_id: String,
    /// Metric being consumed.
    pub metric: String,
    /// Units requested.
    pub quantity: u64,
    /// Optional idempotency key; retries with the same key replay the
    /// stored decision.
    pub idempotency_key: Option<String>,
}

/// Check-and-debit response (admission).
#[derive(Debug, Serialize)]
pub struct CheckAndDebitResponse {
    /// Always true; denials are reported as 402 errors.
    pub admitted: bool,
    /// Allowance units remaining after the debit.
    pub remaining_allowance: u64,
    /// Units of this request covered by metric-scoped credits.
    pub credit_units_used: u64,
    /// Whether a stored decision was replayed for a retried key.
    pub replayed: bool,
}

/// Atomically check quota and debit the current period's balance.
pub async fn check_and_debit(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<CheckAndDebitRequest>,
) -> Result<Json<CheckAndDebitResponse>, ApiError> {
    let account_id = parse_account_id(&body.account_id)?;
    let metric = parse_metric(&body.metric)?;

    let period = state
        .store
        .find_period_containing(&account_id, Utc::now())?
        .filter(meterd_core::BillingPeriod::is_open)
        .ok_or_else(|| {
            ApiError::from(MeterError::PeriodNotOpen {
                account_id: account_id.to_string(),
            })
        })?;

    let outcome = state.ledger.check_and_debit(
        &period,
        metric,
        body.quantity,
        body.idempotency_key.as_deref(),
        true,
    )?;

    tracing::debug!(
        service = %auth.service_name,
        account_id = %account_id,
        metric = %metric,
        quantity = %body.quantity,
        remaining = %outcome.remaining_allowance,
        "Debit admitted"
    );

    state.dispatch_thresholds(outcome.thresholds_crossed.clone());

    Ok(Json(CheckAndDebitResponse {
        admitted: true,
        remaining_allowance: outcome.remaining_allowance,
        credit_units_used: outcome.credit_units_used,
        replayed: outcome.replayed,
    }))
}

/// Usage event request.
#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    /// Unique event ID for idempotency.
    pub event_id: String,
    /// Account being metered.
    pub account_id: String,
    /// Metric consumed.
    pub metric: String,
    /// Units consumed.
    pub quantity: u64,
    /// When the usage happened; defaults to now. Determines the billing
    /// period.
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Usage event response.
#[derive(Debug, Serialize)]
pub struct RecordResponse {
    /// Whether the event was applied (false for duplicates).
    pub accepted: bool,
    /// Whether the event ID had been seen before.
    pub duplicate: bool,
    /// The period the event was attributed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_id: Option<String>,
    /// Allowance units remaining after the debit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_allowance: Option<u64>,
}

/// Record a single usage event.
pub async fn record_usage(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<RecordRequest>,
) -> Result<Json<RecordResponse>, ApiError> {
    let response = record_one(&state, &auth.service_name, body)?;
    Ok(Json(response))
}

/// Batch usage request.
#[derive(Debug, Deserialize)]
pub struct BatchRecordRequest {
    /// List of usage events.
    pub events: Vec<RecordRequest>,
}

/// Batch usage response.
#[derive(Debug, Serialize)]
pub struct BatchRecordResponse {
    /// Results for each event, in request order.
    pub results: Vec<BatchRecordResult>,
    /// Events applied (duplicates count as processed).
    pub processed: usize,
    /// Events rejected.
    pub failed: usize,
}

/// Result for a single event in a batch.
#[derive(Debug, Serialize)]
pub struct BatchRecordResult {
    /// The event ID.
    pub event_id: String,
    /// Whether the event was applied or was a duplicate.
    pub success: bool,
    /// Error message if rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Record multiple usage events. One rejected event never fails the batch.
pub async fn record_usage_batch(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<BatchRecordRequest>,
) -> Result<Json<BatchRecordResponse>, ApiError> {
    let mut results = Vec::with_capacity(body.events.len());
    let mut processed = 0;
    let mut failed = 0;

    for event_req in body.events {
        let event_id = event_req.event_id.clone();
        match record_one(&state, &auth.service_name, event_req) {
            Ok(_) => {
                results.push(BatchRecordResult {
                    event_id,
                    success: true,
                    error: None,
                });
                processed += 1;
            }
            Err(e) => {
                results.push(BatchRecordResult {
                    event_id,
                    success: false,
                    error: Some(e.to_string()),
                });
                failed += 1;
            }
        }
    }

    Ok(Json(BatchRecordResponse {
        results,
        processed,
        failed,
    }))
}

/// Refund request.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Account to refund.
    pub account_id: String,
    /// Metric to restore.
    pub metric: String,
    /// Units to restore.
    pub quantity: u64,
    /// Period to refund against; defaults to the current period.
    pub period_id: Option<String>,
}

/// Refund response.
#[derive(Debug, Serialize)]
pub struct RefundResponse {
    /// Units actually removed from `consumed`.
    pub units_refunded: u64,
    /// Of those, units restored onto credit grants.
    pub credit_units_restored: u64,
}

/// Reverse a prior debit.
pub async fn refund_usage(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, ApiError> {
    let account_id = parse_account_id(&body.account_id)?;
    let metric = parse_metric(&body.metric)?;

    let period_id = match &body.period_id {
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::BadRequest("Invalid period ID".into()))?,
        None => {
            state
                .store
                .find_period_containing(&account_id, Utc::now())?
                .ok_or_else(|| {
                    ApiError::from(MeterError::PeriodNotOpen {
                        account_id: account_id.to_string(),
                    })
                })?
                .period_id
        }
    };

    let outcome = state
        .ledger
        .refund(&account_id, metric, &period_id, body.quantity)?;

    tracing::info!(
        service = %auth.service_name,
        account_id = %account_id,
        metric = %metric,
        units = %outcome.units_refunded,
        "Refund processed"
    );

    Ok(Json(RefundResponse {
        units_refunded: outcome.units_refunded,
        credit_units_restored: outcome.credit_units_restored,
    }))
}

fn record_one(
    state: &AppState,
    service_name: &str,
    body: RecordRequest,
) -> Result<RecordResponse, ApiError> {
    let account_id = parse_account_id(&body.account_id)?;
    let metric = parse_metric(&body.metric)?;

    let event = UsageEvent::new(
        body.event_id,
        account_id,
        metric,
        body.quantity,
        body.occurred_at.unwrap_or_else(Utc::now),
    );

    match state.recorder.record(&event)? {
        RecordOutcome::Accepted { period_id, debit } => {
            tracing::debug!(
                service = %service_name,
                event_id = %event.event_id,
                account_id = %account_id,
                metric = %metric,
                quantity = %event.quantity,
                "Usage event recorded"
            );

            state.dispatch_thresholds(debit.thresholds_crossed.clone());

            Ok(RecordResponse {
                accepted: true,
                duplicate: false,
                period_id: Some(period_id.to_string()),
                remaining_allowance: Some(debit.remaining_allowance),
            })
        }
        RecordOutcome::Duplicate => Ok(RecordResponse {
            accepted: false,
            duplicate: true,
            period_id: None,
            remaining_allowance: None,
        }),
    }
}

pub(crate) fn parse_account_id(raw: &str) -> Result<AccountId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid account ID".into()))
}

pub(crate) fn parse_metric(raw: &str) -> Result<Metric, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Unknown metric: {raw}")))
}
