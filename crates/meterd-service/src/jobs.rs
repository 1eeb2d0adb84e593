//! Background billing cycle job.
//!
//! Periodically walks every account: advances period lifecycle (close-out
//! after the grace window, opening the next period), finalizes invoices for
//! closed periods, and submits finalized invoices to the payment provider.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use meterd_core::{Account, MeterError};
use meterd_store::Store;

use crate::state::AppState;

/// Spawn the billing cycle loop. Runs until the process exits.
pub fn spawn_billing_cycle(state: Arc<AppState>) -> JoinHandle<()> {
    let interval = std::time::Duration::from_secs(state.config.billing_cycle_interval_seconds);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_billing_cycle(&state).await;
        }
    })
}

/// One pass over all accounts. A failure on one account never stops the
/// pass for the others.
pub async fn run_billing_cycle(state: &AppState) {
    let accounts = match state.store.list_accounts() {
        Ok(accounts) => accounts,
        Err(e) => {
            tracing::error!(error = %e, "Billing cycle could not list accounts");
            return;
        }
    };

    let now = Utc::now();
    let mut closed = 0usize;
    let mut opened = 0usize;

    for account in &accounts {
        match state.aggregator.tick_account(&account.account_id, now) {
            Ok(summary) => {
                closed += summary.closed;
                opened += usize::from(summary.opened);
                for delta in &summary.deltas {
                    tracing::warn!(
                        account_id = %delta.account_id,
                        metric = %delta.metric,
                        period_id = %delta.period_id,
                        ledger_consumed = %delta.ledger_consumed,
                        recomputed = %delta.recomputed,
                        "Balance corrected against event log"
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    account_id = %account.account_id,
                    error = %e,
                    "Period lifecycle tick failed"
                );
            }
        }

        if let Err(e) = invoice_closed_periods(state, account, now).await {
            tracing::error!(
                account_id = %account.account_id,
                error = %e,
                "Invoicing pass failed"
            );
        }
    }

    tracing::debug!(
        accounts = accounts.len(),
        periods_closed = closed,
        periods_opened = opened,
        "Billing cycle pass complete"
    );
}

/// Finalize and submit invoices for an account's closed periods.
async fn invoice_closed_periods(
    state: &AppState,
    account: &Account,
    now: chrono::DateTime<Utc>,
) -> Result<(), MeterError> {
    for period in state.store.list_periods(&account.account_id)? {
        if !period.is_closed() {
            continue;
        }

        let invoice = match state.store.get_invoice(&account.account_id, &period.period_id)? {
            Some(invoice) if invoice.is_final() => invoice,
            _ => match state
                .invoices
                .finalize(&account.account_id, &period.period_id, now)
            {
                Ok(invoice) => {
                    tracing::info!(
                        account_id = %account.account_id,
                        period_id = %period.period_id,
                        invoice_id = %invoice.invoice_id,
                        total_cents = %invoice.total_cents,
                        "Invoice finalized by billing cycle"
                    );
                    invoice
                }
                // Warned every pass until an operator pins a plan; the
                // account's other periods still get invoiced.
                Err(MeterError::PricingConfigMissing { period_id }) => {
                    tracing::warn!(
                        account_id = %account.account_id,
                        period_id = %period_id,
                        "Closed period has no pricing plan; invoice blocked"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            },
        };

        // Submission retries across cycles until a reference is attached.
        if let Some(payments) = &state.payments {
            if invoice.external_ref.is_none() && invoice.total_cents > 0 {
                match payments.submit_invoice(&invoice).await {
                    Ok(external_ref) => {
                        state.invoices.attach_external_ref(
                            &account.account_id,
                            &period.period_id,
                            external_ref,
                        )?;
                    }
                    Err(e) => {
                        tracing::error!(
                            invoice_id = %invoice.invoice_id,
                            error = %e,
                            "Invoice submission failed"
                        );
                    }
                }
            }
        }
    }
    Ok(())
}
