use chrono::{DateTime, Duration, Utc};

use crate::subscriptions::SubscriptionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: SubscriptionStatus,
    pub next_payment_at: DateTime<Utc>,
}

/// Next subscription state after one charge attempt.
///
/// On success the next payment anchors to the previous scheduled instant,
/// never to the current time: a sweep that runs late must not shift the
/// billing cadence. On failure the due date is left untouched so the next
/// sweep re-selects the same item. Canceled is terminal.
pub fn transition(
    status: SubscriptionStatus,
    next_payment_at: DateTime<Utc>,
    billing_interval_secs: i64,
    outcome: ChargeOutcome,
) -> Transition {
    if status == SubscriptionStatus::Canceled {
        return Transition {
            status: SubscriptionStatus::Canceled,
            next_payment_at,
        };
    }

    match outcome {
        ChargeOutcome::Success => Transition {
            status: SubscriptionStatus::Active,
            next_payment_at: next_payment_at + Duration::seconds(billing_interval_secs),
        },
        ChargeOutcome::Failed => Transition {
            status: SubscriptionStatus::PastDue,
            next_payment_at,
        },
    }
}
