use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use super::Keeper;
use crate::error::BillingError;

/// Fires a sweep on a fixed interval. The loop awaits each sweep before the
/// next tick, so loop-driven ticks cannot overlap; the keeper's own in-flight
/// guard covers manual triggers racing the loop.
pub fn spawn(keeper: Arc<Keeper>, tick_interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match keeper.run_once().await {
                Ok(summary) => {
                    tracing::info!(
                        "Billing sweep finished: {} processed, {} succeeded, {} failed",
                        summary.processed,
                        summary.succeeded,
                        summary.failed
                    );
                    for error in &summary.errors {
                        tracing::warn!(
                            "Sweep item failed: subscription {} ({})",
                            error.subscription_id,
                            error.reason
                        );
                    }
                }
                Err(BillingError::SweepInProgress) => {
                    tracing::warn!("Previous billing sweep still running, skipping tick");
                }
                Err(e) => {
                    tracing::error!("Billing sweep aborted: {}", e);
                }
            }
        }
    })
}
