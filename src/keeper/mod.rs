pub mod scheduler;
pub mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use ethers::types::U256;
use serde::Serialize;

use crate::billing_log::{BillingLogStore, BillingOutcome};
use crate::chain::{self, ChainClient, ChainError};
use crate::error::{BillingError, Result};
use crate::subscriptions::{DueCharge, SubscriptionStore};
use state::ChargeOutcome;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickError {
    pub subscription_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub errors: Vec<TickError>,
}

enum ItemOutcome {
    Charged,
    ChargeFailed(String),
}

/// Drives recurring charges: selects the due set, charges each item
/// sequentially through the chain gateway and records the outcome.
pub struct Keeper {
    subscriptions: Arc<dyn SubscriptionStore + Send + Sync>,
    billing_log: Arc<dyn BillingLogStore + Send + Sync>,
    chain: Arc<dyn ChainClient + Send + Sync>,
    in_flight: AtomicBool,
}

impl Keeper {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore + Send + Sync>,
        billing_log: Arc<dyn BillingLogStore + Send + Sync>,
        chain: Arc<dyn ChainClient + Send + Sync>,
    ) -> Self {
        Self {
            subscriptions,
            billing_log,
            chain,
            in_flight: AtomicBool::new(false),
        }
    }

    /// One full sweep. Non-reentrant: a call that would overlap a running
    /// sweep returns `SweepInProgress` without touching the ledger.
    pub async fn run_once(&self) -> Result<TickSummary> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BillingError::SweepInProgress);
        }
        let result = self.sweep().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn sweep(&self) -> Result<TickSummary> {
        // A due-set read failure aborts the whole tick; per-item failures
        // below never do.
        let due = self.subscriptions.select_due(Utc::now()).await?;
        let mut summary = TickSummary::default();

        for item in &due {
            summary.processed += 1;
            match self.process_due(item).await {
                Ok(ItemOutcome::Charged) => summary.succeeded += 1,
                Ok(ItemOutcome::ChargeFailed(reason)) => {
                    summary.failed += 1;
                    summary.errors.push(TickError {
                        subscription_id: item.subscription_id.clone(),
                        reason,
                    });
                }
                Err(e) => {
                    summary.failed += 1;
                    summary.errors.push(TickError {
                        subscription_id: item.subscription_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(summary)
    }

    /// Charge one due item and reconcile the ledger with the outcome.
    /// `Err` here means a persistence failure, not a failed charge.
    async fn process_due(&self, item: &DueCharge) -> Result<ItemOutcome> {
        let charge_result = match chain::parse_address(&item.wallet_address) {
            Ok(subscriber) => {
                self.chain
                    .charge(subscriber, U256::from(item.onchain_plan_id))
                    .await
            }
            Err(e) => Err(e),
        };

        match charge_result {
            Ok(receipt) => {
                let tx_hash = format!("{:#x}", receipt.tx_hash);
                // The tx hash must be durable before the state write; a
                // recovery pass replays missed writes from the log.
                self.billing_log
                    .insert_billing_log(
                        &item.subscription_id,
                        Some(&tx_hash),
                        BillingOutcome::Success,
                        None,
                    )
                    .await?;
                let next = state::transition(
                    item.status,
                    item.next_payment_at,
                    item.billing_interval_secs,
                    ChargeOutcome::Success,
                );
                if let Err(e) = self
                    .subscriptions
                    .set_status_and_next_payment(&item.subscription_id, next.status, next.next_payment_at)
                    .await
                {
                    tracing::error!(
                        "Ledger update failed after successful charge {} for subscription {}: {}",
                        tx_hash,
                        item.subscription_id,
                        e
                    );
                    return Err(e);
                }
                Ok(ItemOutcome::Charged)
            }
            Err(err) => {
                let reason = match err {
                    ChainError::ChargeFailed(reason) => reason,
                    other => other.to_string(),
                };
                tracing::warn!(
                    "Charge failed for subscription {}: {}",
                    item.subscription_id,
                    reason
                );
                let next = state::transition(
                    item.status,
                    item.next_payment_at,
                    item.billing_interval_secs,
                    ChargeOutcome::Failed,
                );
                self.subscriptions
                    .set_status_and_next_payment(&item.subscription_id, next.status, next.next_payment_at)
                    .await?;
                self.billing_log
                    .insert_billing_log(
                        &item.subscription_id,
                        None,
                        BillingOutcome::Failed,
                        Some(&reason),
                    )
                    .await?;
                Ok(ItemOutcome::ChargeFailed(reason))
            }
        }
    }
}
