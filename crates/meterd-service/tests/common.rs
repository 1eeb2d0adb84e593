//! Common test utilities for meterd integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use serde_json::json;
use tempfile::TempDir;

use meterd_service::{create_router, AppState, ServiceConfig};
use meterd_store::RocksStore;

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// The service API key for metering requests.
    pub service_api_key: String,
    /// The admin API key for configuration requests.
    pub admin_api_key: String,
    /// The webhook secret, when configured.
    pub webhook_secret: Option<String>,
    /// The application state, for tests that reach past the HTTP surface.
    pub state: AppState,
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a harness with payment webhook signature verification enabled.
    pub fn with_webhook_secret(secret: &str) -> Self {
        Self::build(Some(secret.to_string()))
    }

    fn build(webhook_secret: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = RocksStore::open(temp_dir.path()).expect("Failed to open store");

        let service_api_key = "test-service-key".to_string();
        let admin_api_key = "test-admin-key".to_string();

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            service_api_key: Some(service_api_key.clone()),
            admin_api_key: Some(admin_api_key.clone()),
            payment_api_url: None,
            payment_api_key: None,
            payment_webhook_secret: webhook_secret.clone(),
            notify_webhook_url: None,
            ..ServiceConfig::default()
        };

        let state = AppState::new(Arc::new(store), config);
        let router: Router = create_router(state.clone());

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            _temp_dir: temp_dir,
            service_api_key,
            admin_api_key,
            webhook_secret,
            state,
        }
    }

    /// Upload a plan version. Basic-style plans deny overage; pro-style
    /// plans admit and price it.
    pub async fn create_plan(&self, allow_overage: bool) -> String {
        let tier = if allow_overage { "pro" } else { "basic" };
        let response = self
            .server
            .post("/v1/plans")
            .add_header("x-admin-key", self.admin_api_key.clone())
            .json(&json!({
                "tier": tier,
                "allow_overage": allow_overage,
                "rates": {
                    "api_call": {
                        "included_allowance": 1000,
                        "unit_rate_millicents": null,
                        "overage_rate_millicents": 1000,
                    },
                    "lines_reviewed": {
                        "included_allowance": 50_000,
                        "unit_rate_millicents": null,
                        "overage_rate_millicents": 10,
                    },
                    "docs_generated": {
                        "included_allowance": 100,
                        "unit_rate_millicents": null,
                        "overage_rate_millicents": 25_000,
                    },
                },
            }))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        body["plan_id"].as_str().expect("plan_id").to_string()
    }

    /// Register an account, optionally on a plan, and return its ID. The
    /// first billing period opens as part of registration.
    pub async fn create_account(&self, plan_id: Option<&str>) -> String {
        let response = self
            .server
            .post("/v1/accounts")
            .add_header("x-admin-key", self.admin_api_key.clone())
            .json(&json!({ "plan_id": plan_id }))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        body["account_id"].as_str().expect("account_id").to_string()
    }

    /// Record one usage event via the service API and return the response
    /// body.
    pub async fn record_usage(
        &self,
        account_id: &str,
        event_id: &str,
        metric: &str,
        quantity: u64,
    ) -> serde_json::Value {
        let response = self
            .server
            .post("/v1/usage/record")
            .add_header("x-api-key", self.service_api_key.clone())
            .json(&json!({
                "event_id": event_id,
                "account_id": account_id,
                "metric": metric,
                "quantity": quantity,
            }))
            .await;
        response.assert_status_ok();
        response.json()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
