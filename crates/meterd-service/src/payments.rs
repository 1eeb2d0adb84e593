//! Payment collaborator client.
//!
//! Finalized invoices are submitted here for collection. Submission returns
//! the collaborator's reference; the terminal verdict (PAID/FAILED) arrives
//! asynchronously on `/webhooks/payment`. This service never captures
//! payment itself.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use meterd_core::Invoice;

/// Maximum number of submission attempts.
const MAX_RETRIES: u32 = 3;

/// Initial backoff duration for retries (doubles with each attempt).
const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff duration for retries.
const MAX_BACKOFF_MS: u64 = 5000;

/// Errors from the payment collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The HTTP request failed.
    #[error("payment request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The collaborator rejected the invoice.
    #[error("payment collaborator rejected invoice: {0}")]
    Rejected(String),
}

/// Invoice submission payload.
#[derive(Debug, Serialize)]
struct SubmitInvoiceRequest<'a> {
    invoice_id: String,
    account_id: String,
    period_id: String,
    amount_cents: i64,
    currency: &'a str,
}

/// Invoice submission response.
#[derive(Debug, Deserialize)]
struct SubmitInvoiceResponse {
    external_ref: String,
}

/// Collaborator-side rejection body.
#[derive(Debug, Deserialize)]
struct RejectionResponse {
    #[serde(default)]
    reason: String,
}

/// HTTP client for the payment collaborator.
pub struct PaymentClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PaymentClient {
    /// Create a new client.
    #[must_use]
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Submit a FINAL invoice for collection, retrying transient failures
    /// with exponential backoff. Returns the collaborator's reference.
    ///
    /// # Errors
    ///
    /// - `PaymentError::Rejected` if the collaborator refuses the invoice.
    /// - `PaymentError::Request` if all attempts fail transport-side.
    pub async fn submit_invoice(&self, invoice: &Invoice) -> Result<String, PaymentError> {
        let mut attempt = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.submit_once(invoice).await {
                Ok(external_ref) => return Ok(external_ref),
                // Rejection is a decision, not a fault; do not retry it.
                Err(e @ PaymentError::Rejected(_)) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        tracing::warn!(
                            invoice_id = %invoice.invoice_id,
                            attempt = %attempt,
                            error = %e,
                            "Invoice submission failed after max retries"
                        );
                        return Err(e);
                    }

                    tracing::debug!(
                        invoice_id = %invoice.invoice_id,
                        attempt = %attempt,
                        backoff_ms = %backoff_ms,
                        error = %e,
                        "Invoice submission failed, retrying"
                    );

                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                }
            }
        }
    }

    async fn submit_once(&self, invoice: &Invoice) -> Result<String, PaymentError> {
        let body = SubmitInvoiceRequest {
            invoice_id: invoice.invoice_id.to_string(),
            account_id: invoice.account_id.to_string(),
            period_id: invoice.period_id.to_string(),
            amount_cents: invoice.total_cents,
            currency: "usd",
        };

        let response = self
            .http
            .post(format!("{}/v1/invoices", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let rejection: RejectionResponse = response.json().await.unwrap_or(RejectionResponse {
                reason: "no reason given".into(),
            });
            return Err(PaymentError::Rejected(rejection.reason));
        }

        let response = response.error_for_status()?;
        let accepted: SubmitInvoiceResponse = response.json().await?;
        Ok(accepted.external_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meterd_core::{AccountId, InvoiceLine, Metric, PeriodId};
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn invoice() -> Invoice {
        let mut invoice = Invoice::draft(
            AccountId::generate(),
            PeriodId::generate(),
            vec![InvoiceLine {
                metric: Metric::ApiCall,
                quantity_included: 1000,
                quantity_overage: 200,
                rate_applied_millicents: 1000,
                amount_cents: 200,
            }],
            0,
        );
        invoice.finalize(chrono::Utc::now());
        invoice
    }

    #[tokio::test]
    async fn submit_returns_external_ref() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/invoices"))
            .and(header_exists("x-api-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "external_ref": "pay_abc123"
                })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = PaymentClient::new(&server.uri(), "test-key");
        let external_ref = client.submit_invoice(&invoice()).await.unwrap();
        assert_eq!(external_ref, "pay_abc123");
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/invoices"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(serde_json::json!({
                    "reason": "account delinquent"
                })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = PaymentClient::new(&server.uri(), "test-key");
        let err = client.submit_invoice(&invoice()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Rejected(r) if r == "account delinquent"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/invoices"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = PaymentClient::new(&server.uri(), "test-key");
        let err = client.submit_invoice(&invoice()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Request(_)));
    }
}
