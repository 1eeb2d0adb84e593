//! Invoice and payment webhook integration tests.

mod common;

use common::TestHarness;
use serde_json::json;

use meterd_core::{AccountId, PeriodId};
use meterd_service::crypto::hmac_sha256_hex;

async fn current_period_id(harness: &TestHarness, account_id: &str) -> String {
    let response = harness
        .server
        .get(&format!("/v1/accounts/{account_id}/periods"))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    let periods: serde_json::Value = response.json();
    periods.as_array().unwrap()[0]["period_id"]
        .as_str()
        .unwrap()
        .to_string()
}

async fn close_period(harness: &TestHarness, account_id: &str, period_id: &str) {
    harness
        .server
        .post(&format!(
            "/v1/accounts/{account_id}/periods/{period_id}/close"
        ))
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .await
        .assert_status_ok();
}

// ============================================================================
// Preview and finalize
// ============================================================================

#[tokio::test]
async fn preview_reflects_running_usage() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(true).await;
    let account_id = harness.create_account(Some(&plan_id)).await;
    let period_id = current_period_id(&harness, &account_id).await;

    // 200 calls beyond the 1000 allowance at $0.01 each
    harness.record_usage(&account_id, "evt-1", "api_call", 1200).await;

    let response = harness
        .server
        .get(&format!(
            "/v1/accounts/{account_id}/invoices/{period_id}/preview"
        ))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;

    response.assert_status_ok();
    let invoice: serde_json::Value = response.json();
    assert_eq!(invoice["status"], "draft");
    assert_eq!(invoice["subtotal_cents"], 200);
    assert_eq!(invoice["total_cents"], 200);
}

#[tokio::test]
async fn finalize_requires_closed_period() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(true).await;
    let account_id = harness.create_account(Some(&plan_id)).await;
    let period_id = current_period_id(&harness, &account_id).await;

    let response = harness
        .server
        .post(&format!(
            "/v1/accounts/{account_id}/invoices/{period_id}/finalize"
        ))
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .await;

    response.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn finalize_prices_overage() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(true).await;
    let account_id = harness.create_account(Some(&plan_id)).await;
    let period_id = current_period_id(&harness, &account_id).await;

    harness.record_usage(&account_id, "evt-1", "api_call", 1200).await;
    close_period(&harness, &account_id, &period_id).await;

    let response = harness
        .server
        .post(&format!(
            "/v1/accounts/{account_id}/invoices/{period_id}/finalize"
        ))
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .await;

    response.assert_status_ok();
    let invoice: serde_json::Value = response.json();
    assert_eq!(invoice["status"], "final");
    assert_eq!(invoice["total_cents"], 200);
    let lines = invoice["lines"].as_array().unwrap();
    let api_line = lines.iter().find(|l| l["metric"] == "api_call").unwrap();
    assert_eq!(api_line["quantity_included"], 1000);
    assert_eq!(api_line["quantity_overage"], 200);

    // Re-finalizing returns the stored invoice, not a new one
    let again = harness
        .server
        .post(&format!(
            "/v1/accounts/{account_id}/invoices/{period_id}/finalize"
        ))
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .await;
    again.assert_status_ok();
    let again: serde_json::Value = again.json();
    assert_eq!(again["invoice_id"], invoice["invoice_id"]);

    // GET returns the same invoice
    let fetched = harness
        .server
        .get(&format!("/v1/accounts/{account_id}/invoices/{period_id}"))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    fetched.assert_status_ok();
    let fetched: serde_json::Value = fetched.json();
    assert_eq!(fetched["invoice_id"], invoice["invoice_id"]);
}

#[tokio::test]
async fn currency_credit_caps_at_invoice_total() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(true).await;
    let account_id = harness.create_account(Some(&plan_id)).await;
    let period_id = current_period_id(&harness, &account_id).await;

    // $5.00 credit against what will be a $3.00 invoice
    harness
        .server
        .post("/v1/credits")
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .json(&json!({
            "account_id": account_id,
            "kind": "currency",
            "amount": 500,
            "source": "goodwill",
        }))
        .await
        .assert_status_ok();

    harness.record_usage(&account_id, "evt-1", "api_call", 1300).await;
    close_period(&harness, &account_id, &period_id).await;

    let response = harness
        .server
        .post(&format!(
            "/v1/accounts/{account_id}/invoices/{period_id}/finalize"
        ))
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .await;

    response.assert_status_ok();
    let invoice: serde_json::Value = response.json();
    assert_eq!(invoice["subtotal_cents"], 300);
    assert_eq!(invoice["credits_applied_cents"], 300);
    assert_eq!(invoice["total_cents"], 0);

    // The unused $2.00 stays on the grant
    let credits = harness
        .server
        .get(&format!("/v1/accounts/{account_id}/credits"))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    let credits: serde_json::Value = credits.json();
    assert_eq!(credits.as_array().unwrap()[0]["remaining"], 200);
}

// ============================================================================
// Payment webhooks
// ============================================================================

#[tokio::test]
async fn signed_webhook_marks_invoice_paid() {
    let harness = TestHarness::with_webhook_secret("whsec-test");
    let plan_id = harness.create_plan(true).await;
    let account_id = harness.create_account(Some(&plan_id)).await;
    let period_id = current_period_id(&harness, &account_id).await;

    harness.record_usage(&account_id, "evt-1", "api_call", 1200).await;
    close_period(&harness, &account_id, &period_id).await;
    harness
        .server
        .post(&format!(
            "/v1/accounts/{account_id}/invoices/{period_id}/finalize"
        ))
        .add_header("x-admin-key", harness.admin_api_key.clone())
        .await
        .assert_status_ok();

    // No payment collaborator is configured in tests; attach the reference
    // the way the submission path would
    let typed_account: AccountId = account_id.parse().unwrap();
    let typed_period: PeriodId = period_id.parse().unwrap();
    harness
        .state
        .invoices
        .attach_external_ref(&typed_account, &typed_period, "pay-ref-1")
        .unwrap();

    let body = json!({ "external_ref": "pay-ref-1", "status": "paid" }).to_string();
    let signature = hmac_sha256_hex("whsec-test", &body);

    let response = harness
        .server
        .post("/webhooks/payment")
        .add_header("x-meterd-signature", signature)
        .text(body)
        .await;

    response.assert_status_ok();
    let ack: serde_json::Value = response.json();
    assert_eq!(ack["received"], true);

    let invoice = harness
        .server
        .get(&format!("/v1/accounts/{account_id}/invoices/{period_id}"))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    let invoice: serde_json::Value = invoice.json();
    assert_eq!(invoice["status"], "paid");
}

#[tokio::test]
async fn webhook_rejects_bad_signature() {
    let harness = TestHarness::with_webhook_secret("whsec-test");

    let body = json!({ "external_ref": "pay-ref-1", "status": "paid" }).to_string();

    let response = harness
        .server
        .post("/webhooks/payment")
        .add_header("x-meterd-signature", "deadbeef")
        .text(body)
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn webhook_for_unknown_reference_is_acknowledged() {
    let harness = TestHarness::with_webhook_secret("whsec-test");

    let body = json!({ "external_ref": "never-issued", "status": "failed" }).to_string();
    let signature = hmac_sha256_hex("whsec-test", &body);

    let response = harness
        .server
        .post("/webhooks/payment")
        .add_header("x-meterd-signature", signature)
        .text(body)
        .await;

    response.assert_status_ok();
    let ack: serde_json::Value = response.json();
    assert_eq!(ack["received"], true);
}
