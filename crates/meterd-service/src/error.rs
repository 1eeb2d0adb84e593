//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use meterd_core::{MeterError, Metric};
use meterd_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - invalid state transition or configuration gap.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Quota or credit exhausted.
    #[error("admission denied: {metric} requested={requested}, remaining={remaining}")]
    AdmissionDenied {
        /// The denied metric.
        metric: Metric,
        /// Units requested.
        requested: u64,
        /// Allowance units remaining.
        remaining: u64,
    },

    /// Event arrived after its period closed; flagged for review.
    #[error("late event rejected: {0}")]
    LateEvent(String),

    /// Storage is temporarily failing; the caller may retry with backoff.
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External collaborator error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::AdmissionDenied {
                metric,
                requested,
                remaining,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "admission_denied",
                self.to_string(),
                Some(serde_json::json!({
                    "metric": metric.as_str(),
                    "requested": requested,
                    "remaining": remaining
                })),
            ),
            Self::LateEvent(msg) => (
                StatusCode::CONFLICT,
                "late_event_rejected",
                msg.clone(),
                None,
            ),
            Self::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Storage temporarily unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "Temporarily unavailable, retry with backoff".to_string(),
                    None,
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<MeterError> for ApiError {
    fn from(err: MeterError) -> Self {
        match err {
            MeterError::AdmissionDenied {
                metric,
                requested,
                remaining,
            } => Self::AdmissionDenied {
                metric,
                requested,
                remaining,
            },
            MeterError::LateEventRejected {
                event_id,
                period_id,
            } => Self::LateEvent(format!(
                "event {event_id} arrived after period {period_id} closed; flagged for review"
            )),
            MeterError::NotFound { entity, id } => Self::NotFound(format!("{entity}: {id}")),
            MeterError::TransientStorage(msg) => Self::Unavailable(msg),
            MeterError::DuplicateEvent { event_id } => {
                Self::Conflict(format!("duplicate event: {event_id}"))
            }
            MeterError::PeriodNotOpen { account_id } => {
                Self::Conflict(format!("no open billing period for account {account_id}"))
            }
            MeterError::PricingConfigMissing { period_id } => Self::Conflict(format!(
                "pricing configuration missing for period {period_id}"
            )),
            MeterError::InvalidState(msg) => Self::Conflict(msg),
            MeterError::InvalidQuantity(msg) => Self::BadRequest(msg),
            MeterError::InvalidId(e) => Self::BadRequest(e.to_string()),
            MeterError::ReconciliationConflict { .. } | MeterError::Serialization(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity}: {id}")),
            StoreError::DuplicateEvent { event_id } => {
                Self::Conflict(format!("duplicate event: {event_id}"))
            }
            StoreError::Database(msg) => Self::Unavailable(msg),
            StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}
