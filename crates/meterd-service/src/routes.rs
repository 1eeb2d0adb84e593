//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, credits, health, invoices, periods, plans, usage, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for usage endpoints.
/// This prevents overload from high-volume metering traffic.
const USAGE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Usage (service API key auth, rate-limited)
/// - `POST /v1/usage/check-and-debit` - Atomic quota check and debit
/// - `POST /v1/usage/record` - Record a usage event
/// - `POST /v1/usage/record/batch` - Record multiple usage events
/// - `POST /v1/usage/refund` - Reverse a prior debit
///
/// ## Accounts
/// - `POST /v1/accounts` - Register an account (admin)
/// - `GET /v1/accounts/:id` - Get an account
/// - `POST /v1/accounts/:id/plan` - Assign a plan (admin)
/// - `GET /v1/accounts/:id/balances` - Quota balances for a period
/// - `GET /v1/accounts/:id/periods` - List billing periods
/// - `GET /v1/accounts/:id/credits` - List credits
///
/// ## Plans and credits (admin auth for writes)
/// - `POST /v1/plans` - Upload a plan version
/// - `GET /v1/plans/:id` - Get a plan version
/// - `POST /v1/credits` - Grant a credit
///
/// ## Period lifecycle (admin auth)
/// - `POST /v1/accounts/:id/periods/open` - Open a period if none covers now
/// - `POST /v1/accounts/:id/periods/:period_id/close` - Force-close a period
/// - `GET /v1/periods/:period_id/flagged` - Events flagged after close
///
/// ## Invoices
/// - `GET /v1/accounts/:id/invoices/:period_id` - Get an invoice
/// - `GET /v1/accounts/:id/invoices/:period_id/preview` - Preview an invoice
/// - `POST /v1/accounts/:id/invoices/:period_id/finalize` - Finalize (admin)
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/payment` - Payment provider callbacks
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    // Build CORS layer
    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    // Metering endpoints sit on the request hot path of every caller, so
    // they get a higher concurrency limit but stay protected from overload.
    let usage_routes = Router::new()
        .route("/check-and-debit", post(usage::check_and_debit))
        .route("/record", post(usage::record_usage))
        .route("/record/batch", post(usage::record_usage_batch))
        .route("/refund", post(usage::refund_usage))
        .layer(ConcurrencyLimitLayer::new(USAGE_MAX_CONCURRENT_REQUESTS));

    // Create concurrency-limited API routes
    let api_routes = Router::new()
        // Accounts
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/:id", get(accounts::get_account))
        .route("/accounts/:id/plan", post(accounts::assign_plan))
        .route("/accounts/:id/balances", get(periods::list_balances))
        .route("/accounts/:id/periods", get(periods::list_periods))
        .route("/accounts/:id/credits", get(credits::list_credits))
        // Plans
        .route("/plans", post(plans::create_plan))
        .route("/plans/:id", get(plans::get_plan))
        // Credits
        .route("/credits", post(credits::grant_credit))
        // Period lifecycle
        .route("/accounts/:id/periods/open", post(periods::open_period))
        .route(
            "/accounts/:id/periods/:period_id/close",
            post(periods::close_period),
        )
        .route("/periods/:period_id/flagged", get(periods::list_flagged))
        // Invoices
        .route(
            "/accounts/:id/invoices/:period_id",
            get(invoices::get_invoice),
        )
        .route(
            "/accounts/:id/invoices/:period_id/preview",
            get(invoices::preview_invoice),
        )
        .route(
            "/accounts/:id/invoices/:period_id/finalize",
            post(invoices::finalize_invoice),
        )
        // Usage routes (with their own concurrency limit)
        .nest("/usage", usage_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by external services)
        .route("/webhooks/payment", post(webhooks::payment_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
