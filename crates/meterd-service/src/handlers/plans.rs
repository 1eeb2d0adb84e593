//! Pricing plan handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use meterd_core::{Metric, MetricRates, PlanId, PlanTier, PricingPlan};
use meterd_store::Store;

use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

/// Plan upload request. The server assigns the version's `plan_id`; plan
/// versions are immutable once effective, so changes are uploaded as new
/// versions.
#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    /// Tier label.
    pub tier: PlanTier,
    /// Per-metric allowances and rates.
    pub rates: HashMap<Metric, MetricRates>,
    /// Whether usage beyond the allowance is admitted and priced.
    pub allow_overage: bool,
    /// When the version becomes effective; defaults to now. Back-dating is
    /// refused: an effective date before upload time could retroactively
    /// change already-priced periods.
    pub effective_from: Option<DateTime<Utc>>,
}

/// Upload a new pricing plan version.
pub async fn create_plan(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Json(body): Json<CreatePlanRequest>,
) -> Result<Json<PricingPlan>, ApiError> {
    let now = Utc::now();
    let effective_from = body.effective_from.unwrap_or(now);
    if effective_from < now {
        return Err(ApiError::BadRequest(
            "effective_from cannot be in the past".into(),
        ));
    }

    for (metric, rates) in &body.rates {
        if rates.overage_rate_millicents < 0 || rates.unit_rate_millicents.is_some_and(|r| r < 0) {
            return Err(ApiError::BadRequest(format!(
                "negative rate for metric {metric}"
            )));
        }
    }

    let plan = PricingPlan {
        plan_id: PlanId::generate(),
        tier: body.tier,
        rates: body.rates,
        allow_overage: body.allow_overage,
        effective_from,
        effective_to: None,
    };
    state.store.put_plan(&plan)?;

    tracing::info!(plan_id = %plan.plan_id, tier = ?plan.tier, "Plan version uploaded");
    Ok(Json(plan))
}

/// Get a plan version by ID.
pub async fn get_plan(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(plan_id): Path<String>,
) -> Result<Json<PricingPlan>, ApiError> {
    let plan_id: PlanId = plan_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid plan ID".into()))?;
    let plan = state
        .store
        .get_plan(&plan_id)?
        .ok_or_else(|| ApiError::NotFound(format!("plan: {plan_id}")))?;
    Ok(Json(plan))
}
