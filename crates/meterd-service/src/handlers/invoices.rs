//! Invoice handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;

use meterd_core::Invoice;
use meterd_store::Store;

use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::handlers::periods::parse_period_id;
use crate::handlers::usage::parse_account_id;
use crate::state::AppState;

/// Get a period's invoice.
pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path((account_id, period_id)): Path<(String, String)>,
) -> Result<Json<Invoice>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let period_id = parse_period_id(&period_id)?;

    let invoice = state
        .invoices
        .get(&account_id, &period_id)?
        .ok_or_else(|| ApiError::NotFound(format!("invoice for period: {period_id}")))?;
    Ok(Json(invoice))
}

/// Preview a period's invoice without persisting anything or consuming
/// credits. Works for open periods too: the event log is re-aggregated
/// first (idempotent) so the totals reflect usage so far.
pub async fn preview_invoice(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path((account_id, period_id)): Path<(String, String)>,
) -> Result<Json<Invoice>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let period_id = parse_period_id(&period_id)?;

    let period = state
        .store
        .get_period(&account_id, &period_id)?
        .ok_or_else(|| ApiError::NotFound(format!("period: {period_id}")))?;
    state.aggregator.aggregate_period(&period)?;

    let invoice = state.invoices.preview(&account_id, &period_id)?;
    Ok(Json(invoice))
}

/// Finalize a closed period's invoice and submit it for collection.
///
/// Idempotent: re-finalizing returns the stored invoice. Submission to the
/// payment provider happens once; an invoice that already carries an
/// external reference is not resubmitted.
pub async fn finalize_invoice(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Path((account_id, period_id)): Path<(String, String)>,
) -> Result<Json<Invoice>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let period_id = parse_period_id(&period_id)?;

    let mut invoice = state.invoices.finalize(&account_id, &period_id, Utc::now())?;

    if let Some(payments) = &state.payments {
        if invoice.external_ref.is_none() && invoice.total_cents > 0 {
            match payments.submit_invoice(&invoice).await {
                Ok(external_ref) => {
                    invoice = state
                        .invoices
                        .attach_external_ref(&account_id, &period_id, external_ref)?;
                }
                Err(e) => {
                    // The invoice stays final without a reference; the billing
                    // cycle job retries submission on its next pass.
                    tracing::error!(
                        invoice_id = %invoice.invoice_id,
                        error = %e,
                        "Invoice submission failed"
                    );
                }
            }
        }
    }

    tracing::info!(
        account_id = %account_id,
        period_id = %period_id,
        invoice_id = %invoice.invoice_id,
        total_cents = %invoice.total_cents,
        "Invoice finalized"
    );
    Ok(Json(invoice))
}
