//! Billing cycle job integration tests.

mod common;

use common::TestHarness;

use meterd_service::jobs::run_billing_cycle;

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

#[tokio::test]
async fn cycle_invoices_closed_periods_and_isolates_plan_less_ones() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(true).await;
    let priced = harness.create_account(Some(&plan_id)).await;
    let unpriced = harness.create_account(None).await;

    harness.record_usage(&priced, "evt-1", "api_call", 1200).await;

    let priced_period = current_period_id(&harness, &priced).await;
    let unpriced_period = current_period_id(&harness, &unpriced).await;
    close_period(&harness, &priced, &priced_period).await;
    close_period(&harness, &unpriced, &unpriced_period).await;

    run_billing_cycle(&harness.state).await;

    // The priced account's closed period got a FINAL invoice.
    let response = harness
        .server
        .get(&format!("/v1/accounts/{priced}/invoices/{priced_period}"))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    response.assert_status_ok();
    let invoice: serde_json::Value = response.json();
    assert_eq!(invoice["status"], "final");
    assert_eq!(invoice["total_cents"], 200);

    // The plan-less period stays uninvoiced without derailing the pass.
    let response = harness
        .server
        .get(&format!(
            "/v1/accounts/{unpriced}/invoices/{unpriced_period}"
        ))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn cycle_is_a_no_op_when_rerun() {
    let harness = TestHarness::new();
    let plan_id = harness.create_plan(true).await;
    let account_id = harness.create_account(Some(&plan_id)).await;

    harness
        .record_usage(&account_id, "evt-1", "api_call", 1200)
        .await;
    let period_id = current_period_id(&harness, &account_id).await;
    close_period(&harness, &account_id, &period_id).await;

    run_billing_cycle(&harness.state).await;
    let first = harness
        .server
        .get(&format!("/v1/accounts/{account_id}/invoices/{period_id}"))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    let first: serde_json::Value = first.json();

    run_billing_cycle(&harness.state).await;
    let second = harness
        .server
        .get(&format!("/v1/accounts/{account_id}/invoices/{period_id}"))
        .add_header("x-api-key", harness.service_api_key.clone())
        .await;
    let second: serde_json::Value = second.json();

    assert_eq!(first["invoice_id"], second["invoice_id"]);
    assert_eq!(second["total_cents"], 200);
}
