//! Billing period handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use meterd_core::{BillingPeriod, FlaggedEvent, MeterError, PeriodId, QuotaBalance};
use meterd_engine::ReconciliationDelta;
use meterd_store::Store;

use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::handlers::usage::parse_account_id;
use crate::state::AppState;

/// List an account's billing periods.
pub async fn list_periods(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
) -> Result<Json<Vec<BillingPeriod>>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let periods = state.store.list_periods(&account_id)?;
    Ok(Json(periods))
}

/// Balance query parameters.
#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    /// Period to read; defaults to the period containing now.
    pub period_id: Option<String>,
}

/// List an account's quota balances for a period.
pub async fn list_balances(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<Vec<QuotaBalance>>, ApiError> {
    let account_id = parse_account_id(&account_id)?;

    let period_id = match &query.period_id {
        Some(raw) => parse_period_id(raw)?,
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

    let balances = state.store.list_balances(&account_id, &period_id)?;
    Ok(Json(balances))
}

/// List events flagged against a closed period.
pub async fn list_flagged(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Path(period_id): Path<String>,
) -> Result<Json<Vec<FlaggedEvent>>, ApiError> {
    let period_id = parse_period_id(&period_id)?;
    let flagged = state.store.list_flagged_events(&period_id)?;
    Ok(Json(flagged))
}

/// Response for an explicit period-open request.
#[derive(Debug, Serialize)]
pub struct OpenPeriodResponse {
    /// Whether a new period was opened (false when one already covers now).
    pub opened: bool,
    /// The period covering now.
    pub period: BillingPeriod,
}

/// Open a billing period for an account if none covers the current instant.
pub async fn open_period(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Path(account_id): Path<String>,
) -> Result<Json<OpenPeriodResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let account = state
        .store
        .get_account(&account_id)?
        .ok_or_else(|| ApiError::NotFound(format!("account: {account_id}")))?;

    let now = Utc::now();
    let opened = state.aggregator.ensure_open_period(&account, now)?;
    let period = state
        .store
        .find_period_containing(&account_id, now)?
        .ok_or_else(|| ApiError::Internal("opened period not found".into()))?;

    Ok(Json(OpenPeriodResponse { opened, period }))
}

/// Response for a forced period close.
#[derive(Debug, Serialize)]
pub struct ClosePeriodResponse {
    /// The closed period.
    pub period: BillingPeriod,
    /// Balances the aggregation pass had to correct against the event log.
    pub reconciliation_deltas: Vec<ReconciliationDelta>,
}

/// Force-close a period immediately, skipping the grace window.
///
/// Aggregates the event log into authoritative totals before sealing, so a
/// forced close still produces reconciled balances.
pub async fn close_period(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Path((account_id, period_id)): Path<(String, String)>,
) -> Result<Json<ClosePeriodResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let period_id = parse_period_id(&period_id)?;

    let mut period = state
        .store
        .get_period(&account_id, &period_id)?
        .ok_or_else(|| ApiError::NotFound(format!("period: {period_id}")))?;

    if period.is_closed() {
        return Err(ApiError::Conflict(format!(
            "period {period_id} is already closed"
        )));
    }

    let deltas = state.aggregator.aggregate_period(&period)?;

    let now = Utc::now();
    period.begin_closing();
    period.close(now);
    state.store.put_period(&period)?;

    tracing::info!(
        account_id = %account_id,
        period_id = %period_id,
        deltas = deltas.len(),
        "Period force-closed"
    );

    Ok(Json(ClosePeriodResponse {
        period,
        reconciliation_deltas: deltas,
    }))
}

pub(crate) fn parse_period_id(raw: &str) -> Result<PeriodId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid period ID".into()))
}
