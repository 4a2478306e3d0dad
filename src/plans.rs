use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::BillingError;
use crate::subscriptions::PayToken;

/// Billing plan. Plan CRUD belongs to the dashboard; the billing core only
/// reads the interval, the quoted price and the id the contract knows the
/// plan by.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub onchain_plan_id: u64,
    pub token: PayToken,
    pub amount: u128,
    pub billing_interval_secs: i64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn get_plan(&self, id: &str) -> Result<Option<Plan>, BillingError>;

    async fn list_plans(&self) -> Result<Vec<Plan>, BillingError>;

    async fn insert_plan(&self, plan: Plan) -> Result<(), BillingError>;
}
