//! Account handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use meterd_core::{Account, AccountId, PlanId};
use meterd_store::Store;

use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

/// Account creation request.
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    /// Initial pricing plan; may be assigned later. Accounts without a plan
    /// cannot be invoiced.
    pub plan_id: Option<String>,
}

/// Register an account and open its first billing period.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Json(body): Json<CreateAccountRequest>,
) -> Result<Json<Account>, ApiError> {
    let plan_id = parse_plan_id(body.plan_id.as_deref())?;
    if let Some(plan_id) = plan_id {
        state
            .store
            .get_plan(&plan_id)?
            .ok_or_else(|| ApiError::NotFound(format!("plan: {plan_id}")))?;
    }

    let account = Account::new(AccountId::generate(), plan_id);
    state.store.put_account(&account)?;
    state.aggregator.ensure_open_period(&account, Utc::now())?;

    tracing::info!(account_id = %account.account_id, "Account created");
    Ok(Json(account))
}

/// Get an account by ID.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
) -> Result<Json<Account>, ApiError> {
    let account_id = crate::handlers::usage::parse_account_id(&account_id)?;
    let account = state
        .store
        .get_account(&account_id)?
        .ok_or_else(|| ApiError::NotFound(format!("account: {account_id}")))?;
    Ok(Json(account))
}

/// Plan assignment request.
#[derive(Debug, Deserialize)]
pub struct AssignPlanRequest {
    /// The plan version to assign.
    pub plan_id: String,
}

/// Assign a pricing plan to an account. No proration: the plan pinned at
/// period start governs the running period, so the change takes effect
/// when the next period opens.
pub async fn assign_plan(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Path(account_id): Path<String>,
    Json(body): Json<AssignPlanRequest>,
) -> Result<Json<Account>, ApiError> {
    let account_id = crate::handlers::usage::parse_account_id(&account_id)?;
    let plan_id: PlanId = body
        .plan_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid plan ID".into()))?;

    state
        .store
        .get_plan(&plan_id)?
        .ok_or_else(|| ApiError::NotFound(format!("plan: {plan_id}")))?;

    let mut account = state
        .store
        .get_account(&account_id)?
        .ok_or_else(|| ApiError::NotFound(format!("account: {account_id}")))?;

    account.assign_plan(plan_id);
    state.store.put_account(&account)?;

    tracing::info!(
        account_id = %account_id,
        plan_id = %plan_id,
        "Plan assigned; effective at next period open"
    );
    Ok(Json(account))
}

fn parse_plan_id(raw: Option<&str>) -> Result<Option<PlanId>, ApiError> {
    raw.map(|s| {
        s.parse()
            .map_err(|_| ApiError::BadRequest("Invalid plan ID".into()))
    })
    .transpose()
}
