//! Payment provider webhook handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use meterd_core::MeterError;

use crate::crypto::{constant_time_eq, hmac_sha256_hex};
use crate::error::ApiError;
use crate::state::AppState;

/// Payment webhook payload.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    /// The provider's reference attached to the invoice at submission.
    pub external_ref: String,
    /// `"paid"` or `"failed"`.
    pub status: String,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle payment status callbacks from the payment provider.
///
/// The provider signs the raw body with HMAC-SHA256 and sends the
/// hex-encoded digest in `x-meterd-signature`.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(webhook_secret) = &state.config.payment_webhook_secret {
        let signature = headers
            .get("x-meterd-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("Missing webhook signature".into()))?;

        verify_signature(&body, signature, webhook_secret).map_err(|e| {
            tracing::warn!(error = %e, "Invalid payment webhook signature");
            ApiError::BadRequest("Invalid webhook signature".into())
        })?;
    } else {
        tracing::warn!("Payment webhook_secret not configured - skipping signature verification");
    }

    let webhook: PaymentWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        external_ref = %webhook.external_ref,
        status = %webhook.status,
        "Received payment webhook"
    );

    let paid = match webhook.status.as_str() {
        "paid" => true,
        "failed" => false,
        other => {
            // Unknown statuses are acknowledged so the provider stops
            // retrying; the invoice stays as it was.
            tracing::debug!(status = %other, "Unhandled payment status");
            return Ok(Json(WebhookResponse { received: true }));
        }
    };

    match state.invoices.record_payment(&webhook.external_ref, paid) {
        Ok(invoice) => {
            tracing::info!(
                invoice_id = %invoice.invoice_id,
                account_id = %invoice.account_id,
                paid = %paid,
                "Payment status recorded"
            );
        }
        Err(MeterError::NotFound { .. }) => {
            // A reference we never issued. Acknowledge rather than make the
            // provider retry forever.
            tracing::warn!(
                external_ref = %webhook.external_ref,
                "Payment webhook for unknown invoice reference"
            );
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Json(WebhookResponse { received: true }))
}

/// Verify the webhook signature using HMAC-SHA256.
fn verify_signature(body: &str, signature: &str, secret: &str) -> Result<(), String> {
    let expected = hmac_sha256_hex(secret, body);

    // Constant-time comparison to prevent timing attacks
    if constant_time_eq(&expected, signature) {
        Ok(())
    } else {
        Err("Signature mismatch".into())
    }
}
