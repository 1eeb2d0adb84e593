//! Usage metering integration tests: record, check-and-debit, refund.

mod common;

use common::TestHarness;
use serde_json::json;

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn record_without_auth_fails() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/usage/record")
        .json(&json!({
            "event_id": "evt-1",
            "account_id": "00000000-0000-0000-0000-000000000000",
            "metric": "api_call",
            "quantity": 1,
        }))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn record_with_wrong_key_fails() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/usage/record")
        .add_header("x-api-key", "wrong-key")
        .json(&json!({
            "event_id": "evt-1",
            "account_id": "00000000-0000-0000-0000-000000000000",
            "metric": "api_call",
            "quantity": 1,
        }))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn admin_endpoint_rejects_service_key() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/plans")
        .add_header("x-admin-key", harness.service_api_key.clone())
        .json(&json!({ "tier": "pro", "allow_overage": true, "rates": {} }))
        .await;

    response.assert_status_unauthorized();
}

// ============================================================================
// Record
// ============================================================================

#[tokio::test]
async fn record_event_debits_allowance() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(true).await;
    let account_id = harness.create_account(Some(&plan_id)).await;

    let body = harness.record_usage(&account_id, "evt-1", "api_call", 10).await;

    assert_eq!(body["accepted"], true);
    assert_eq!(body["duplicate"], false);
    assert_eq!(body["remaining_allowance"], 990);
    assert!(body["period_id"].is_string());
}

#[tokio::test]
async fn duplicate_event_is_not_applied_twice() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(true).await;
    let account_id = harness.create_account(Some(&plan_id)).await;

    harness.record_usage(&account_id, "evt-1", "api_call", 10).await;
    let body = harness.record_usage(&account_id, "evt-1", "api_call", 10).await;

    assert_eq!(body["accepted"], false);
    assert_eq!(body["duplicate"], true);

    // Balance only debited once
    let response = harness
        .server
        .get(&format!("/v1/accounts/{account_id}/balances"))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    response.assert_status_ok();
    let balances: serde_json::Value = response.json();
    let api_call = balances
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["metric"] == "api_call")
        .expect("api_call balance");
    assert_eq!(api_call["consumed"], 10);
}

#[tokio::test]
async fn record_unknown_metric_is_rejected() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(true).await;
    let account_id = harness.create_account(Some(&plan_id)).await;

    let response = harness
        .server
        .post("/v1/usage/record")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "event_id": "evt-1",
            "account_id": account_id,
            "metric": "gpu_seconds",
            "quantity": 1,
        }))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn batch_record_isolates_failures() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(true).await;
    let account_id = harness.create_account(Some(&plan_id)).await;

    let response = harness
        .server
        .post("/v1/usage/record/batch")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "events": [
                { "event_id": "evt-1", "account_id": account_id, "metric": "api_call", "quantity": 5 },
                { "event_id": "evt-2", "account_id": account_id, "metric": "bogus", "quantity": 5 },
                { "event_id": "evt-3", "account_id": account_id, "metric": "api_call", "quantity": 7 },
            ],
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["processed"], 2);
    assert_eq!(body["failed"], 1);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[2]["success"], true);
}

// ============================================================================
// Check-and-debit
// ============================================================================

#[tokio::test]
async fn check_and_debit_admits_within_allowance() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(false).await;
    let account_id = harness.create_account(Some(&plan_id)).await;

    let response = harness
        .server
        .post("/v1/usage/check-and-debit")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "account_id": account_id,
            "metric": "api_call",
            "quantity": 400,
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["admitted"], true);
    assert_eq!(body["remaining_allowance"], 600);
}

#[tokio::test]
async fn exhausted_allowance_returns_payment_required() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(false).await;
    let account_id = harness.create_account(Some(&plan_id)).await;

    let response = harness
        .server
        .post("/v1/usage/check-and-debit")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "account_id": account_id,
            "metric": "api_call",
            "quantity": 1001,
        }))
        .await;

    response.assert_status(axum::http::StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "admission_denied");
    assert_eq!(body["error"]["details"]["remaining"], 1000);
}

#[tokio::test]
async fn overage_plan_admits_beyond_allowance() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(true).await;
    let account_id = harness.create_account(Some(&plan_id)).await;

    let response = harness
        .server
        .post("/v1/usage/check-and-debit")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "account_id": account_id,
            "metric": "api_call",
            "quantity": 1200,
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["admitted"], true);
    assert_eq!(body["remaining_allowance"], 0);
}

#[tokio::test]
async fn idempotency_key_replays_stored_decision() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(false).await;
    let account_id = harness.create_account(Some(&plan_id)).await;

    for attempt in 0..2 {
        let response = harness
            .server
            .post("/v1/usage/check-and-debit")
            .add_header("x-api-key", harness.service_api_key.clone())
            .json(&json!({
                "account_id": account_id,
                "metric": "api_call",
                "quantity": 300,
                "idempotency_key": "req-abc",
            }))
            .await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["remaining_allowance"], 700);
        assert_eq!(body["replayed"], attempt == 1);
    }
}

#[tokio::test]
async fn unit_credits_cover_usage_before_allowance() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(false).await;
    let account_id = harness.create_account(Some(&plan_id)).await;

    // Grant a 500-call unit credit
    harness
        .server
        .post("/v1/credits")
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .json(&json!({
            "account_id": account_id,
            "kind": "units",
            "metric": "api_call",
            "amount": 500,
            "source": "promo",
        }))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/v1/usage/check-and-debit")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "account_id": account_id,
            "metric": "api_call",
            "quantity": 600,
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["credit_units_used"], 500);
    // Only 100 units hit the allowance
    assert_eq!(body["remaining_allowance"], 900);
}

// ============================================================================
// Refund
// ============================================================================

#[tokio::test]
async fn refund_restores_allowance() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(false).await;
    let account_id = harness.create_account(Some(&plan_id)).await;

    harness.record_usage(&account_id, "evt-1", "api_call", 100).await;

    let response = harness
        .server
        .post("/v1/usage/refund")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "account_id": account_id,
            "metric": "api_call",
            "quantity": 40,
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["units_refunded"], 40);

    let balances = harness
        .server
        .get(&format!("/v1/accounts/{account_id}/balances"))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    let balances: serde_json::Value = balances.json();
    let api_call = balances
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["metric"] == "api_call")
        .expect("api_call balance");
    assert_eq!(api_call["consumed"], 60);
}

#[tokio::test]
async fn refund_caps_at_consumed() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(false).await;
    let account_id = harness.create_account(Some(&plan_id)).await;

    harness.record_usage(&account_id, "evt-1", "api_call", 30).await;

    let response = harness
        .server
        .post("/v1/usage/refund")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "account_id": account_id,
            "metric": "api_call",
            "quantity": 500,
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["units_refunded"], 30);
}
