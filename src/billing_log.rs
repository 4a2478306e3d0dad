use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BillingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingOutcome {
    Success,
    Failed,
}

impl BillingOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            BillingOutcome::Success => "success",
            BillingOutcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(BillingOutcome::Success),
            "failed" => Some(BillingOutcome::Failed),
            _ => None,
        }
    }
}

/// Append-only audit record of one charge attempt. `tx_hash` is absent for
/// attempts that never reached the chain.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingLogEntry {
    pub id: String,
    pub subscription_id: String,
    pub tx_hash: Option<String>,
    pub outcome: BillingOutcome,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait BillingLogStore: Send + Sync {
    async fn insert_billing_log(
        &self,
        subscription_id: &str,
        tx_hash: Option<&str>,
        outcome: BillingOutcome,
        reason: Option<&str>,
    ) -> Result<BillingLogEntry, BillingError>;

    async fn list_billing_log(
        &self,
        subscription_id: &str,
    ) -> Result<Vec<BillingLogEntry>, BillingError>;

    /// Whether a transaction hash was already recorded by any entry. Used to
    /// keep checkout confirmations from reusing a payment proof.
    async fn tx_hash_seen(&self, tx_hash: &str) -> Result<bool, BillingError>;
}
