use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BillingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PayToken {
    Usdc,
    Usdt,
    Dai,
}

impl PayToken {
    pub fn as_str(self) -> &'static str {
        match self {
            PayToken::Usdc => "USDC",
            PayToken::Usdt => "USDT",
            PayToken::Dai => "DAI",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USDC" => Some(PayToken::Usdc),
            "USDT" => Some(PayToken::Usdt),
            "DAI" => Some(PayToken::Dai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub wallet_address: String,
    pub plan_id: String,
    pub token: PayToken,
    pub amount: u128,
    pub next_payment_at: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub wallet_address: String,
    pub plan_id: String,
    pub token: PayToken,
    pub amount: u128,
    pub next_payment_at: DateTime<Utc>,
}

/// One due item as selected by the keeper: the subscription joined with the
/// plan fields needed to address the contract and advance the schedule.
#[derive(Debug, Clone)]
pub struct DueCharge {
    pub subscription_id: String,
    pub wallet_address: String,
    pub status: SubscriptionStatus,
    pub next_payment_at: DateTime<Utc>,
    pub onchain_plan_id: u64,
    pub billing_interval_secs: i64,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<Subscription, BillingError>;

    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, BillingError>;

    /// Subscriptions due for a charge: active or past-due (the automatic
    /// retry path), next payment at or before `now`, oldest due date first.
    /// The returned order is the processing order.
    async fn select_due(&self, now: DateTime<Utc>) -> Result<Vec<DueCharge>, BillingError>;

    async fn set_status_and_next_payment(
        &self,
        id: &str,
        status: SubscriptionStatus,
        next_payment_at: DateTime<Utc>,
    ) -> Result<(), BillingError>;

    /// Subscriber-initiated cancellation. Canceled is terminal: cancelling an
    /// already-canceled subscription is a conflict.
    async fn cancel_subscription(&self, id: &str) -> Result<Subscription, BillingError>;
}
