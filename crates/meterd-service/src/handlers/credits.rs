//! Credit grant handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use meterd_core::Credit;
use meterd_store::Store;

use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::handlers::usage::{parse_account_id, parse_metric};
use crate::state::AppState;

/// Credit grant request.
#[derive(Debug, Deserialize)]
pub struct GrantCreditRequest {
    /// The account to credit.
    pub account_id: String,
    /// `"currency"` (cents) or `"units"` (requires `metric`).
    pub kind: String,
    /// Metric for unit credits.
    pub metric: Option<String>,
    /// Cents for currency credits, units otherwise.
    pub amount: u64,
    /// Optional expiry; omitted credits never expire.
    pub expires_at: Option<DateTime<Utc>>,
    /// Who or what granted the credit (promo code, support ticket, ...).
    pub source: String,
}

/// Grant a credit to an account.
pub async fn grant_credit(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Json(body): Json<GrantCreditRequest>,
) -> Result<Json<Credit>, ApiError> {
    let account_id = parse_account_id(&body.account_id)?;
    state
        .store
        .get_account(&account_id)?
        .ok_or_else(|| ApiError::NotFound(format!("account: {account_id}")))?;

    if body.amount == 0 {
        return Err(ApiError::BadRequest("credit amount must be positive".into()));
    }
    if body.expires_at.is_some_and(|at| at <= Utc::now()) {
        return Err(ApiError::BadRequest("credit is already expired".into()));
    }

    let credit = match body.kind.as_str() {
        "currency" => Credit::currency(account_id, body.amount, body.expires_at, body.source),
        "units" => {
            let metric = body
                .metric
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("unit credits require a metric".into()))?;
            Credit::units(
                account_id,
                parse_metric(metric)?,
                body.amount,
                body.expires_at,
                body.source,
            )
        }
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown credit kind: {other}"
            )))
        }
    };

    state.store.put_credit(&credit)?;

    tracing::info!(
        account_id = %account_id,
        credit_id = %credit.credit_id,
        kind = %body.kind,
        amount = %body.amount,
        "Credit granted"
    );
    Ok(Json(credit))
}

/// List an account's credits, FIFO-by-expiry.
pub async fn list_credits(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
) -> Result<Json<Vec<Credit>>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let credits = state.store.list_credits(&account_id)?;
    Ok(Json(credits))
}
