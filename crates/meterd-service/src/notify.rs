//! Notification collaborator dispatch.
//!
//! Threshold crossings detected by the ledger are forwarded here as a
//! fire-and-forget webhook. Delivery failures never fail the metering
//! request; they are retried with exponential backoff off the request path
//! and logged if they still fail.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use meterd_engine::ThresholdCrossing;

/// Maximum number of delivery attempts.
const MAX_RETRIES: u32 = 3;

/// Initial backoff duration for retries (doubles with each attempt).
const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff duration for retries.
const MAX_BACKOFF_MS: u64 = 5000;

/// Threshold webhook payload.
#[derive(Debug, Serialize)]
struct ThresholdPayload {
    account_id: String,
    metric: String,
    period_id: String,
    threshold: u8,
    percent_of_allowance: u8,
}

/// HTTP client for the notification collaborator.
pub struct NotificationClient {
    http: reqwest::Client,
    webhook_url: String,
}

impl NotificationClient {
    /// Create a new client.
    #[must_use]
    pub fn new(webhook_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url: webhook_url.to_string(),
        }
    }

    /// Spawn delivery of threshold crossings off the request path.
    pub fn dispatch(self: &Arc<Self>, crossings: Vec<ThresholdCrossing>) {
        if crossings.is_empty() {
            return;
        }

        let client = Arc::clone(self);
        tokio::spawn(async move {
            for crossing in crossings {
                if let Err(e) = client.send_with_retry(&crossing).await {
                    tracing::error!(
                        account_id = %crossing.account_id,
                        metric = %crossing.metric,
                        threshold = %crossing.threshold,
                        error = %e,
                        "Threshold notification failed after all retries"
                    );
                }
            }
        });
    }

    async fn send_with_retry(&self, crossing: &ThresholdCrossing) -> Result<(), reqwest::Error> {
        let mut attempt = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.send_once(crossing).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(e);
                    }

                    tracing::debug!(
                        account_id = %crossing.account_id,
                        threshold = %crossing.threshold,
                        attempt = %attempt,
                        backoff_ms = %backoff_ms,
                        error = %e,
                        "Threshold notification failed, retrying"
                    );

                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                }
            }
        }
    }

    async fn send_once(&self, crossing: &ThresholdCrossing) -> Result<(), reqwest::Error> {
        let payload = ThresholdPayload {
            account_id: crossing.account_id.to_string(),
            metric: crossing.metric.to_string(),
            period_id: crossing.period_id.to_string(),
            threshold: crossing.threshold,
            percent_of_allowance: crossing.percent,
        };

        self.http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meterd_core::{AccountId, Metric, PeriodId};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn crossing() -> ThresholdCrossing {
        ThresholdCrossing {
            account_id: AccountId::generate(),
            metric: Metric::ApiCall,
            period_id: PeriodId::generate(),
            threshold: 75,
            percent: 80,
        }
    }

    #[tokio::test]
    async fn sends_threshold_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .and(body_partial_json(serde_json::json!({
                "metric": "api_call",
                "threshold": 75,
                "percent_of_allowance": 80
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = NotificationClient::new(&format!("{}/alerts", server.uri()));
        client.send_with_retry(&crossing()).await.unwrap();
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = NotificationClient::new(&server.uri());
        assert!(client.send_with_retry(&crossing()).await.is_err());
    }
}
