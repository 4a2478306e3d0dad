use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::error::BillingError;
use crate::storage::database::Ledger;
use crate::storage::time::{parse_utc_string, to_utc_string};
use crate::subscriptions::{
    DueCharge, NewSubscription, PayToken, Subscription, SubscriptionStatus, SubscriptionStore,
};

fn subscription_from_row(
    row: (
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    ),
) -> Result<Subscription, BillingError> {
    let (id, wallet_address, plan_id, token, amount, next_payment_at, status, created_at, updated_at) =
        row;
    let token = PayToken::parse(&token)
        .ok_or_else(|| BillingError::Data(format!("unknown pay token: {token}")))?;
    let status = SubscriptionStatus::parse(&status)
        .ok_or_else(|| BillingError::Data(format!("unknown subscription status: {status}")))?;
    let amount = amount
        .parse::<u128>()
        .map_err(|_| BillingError::Data(format!("bad amount: {amount}")))?;
    Ok(Subscription {
        id,
        wallet_address,
        plan_id,
        token,
        amount,
        next_payment_at: parse_utc_string(&next_payment_at)?,
        status,
        created_at: parse_utc_string(&created_at)?,
        updated_at: parse_utc_string(&updated_at)?,
    })
}

fn fetch_subscription(conn: &Connection, id: &str) -> Result<Option<Subscription>, BillingError> {
    let row = conn
        .query_row(
            "SELECT id, wallet_address, plan_id, token, amount, next_payment_at, status,
                    created_at, updated_at
             FROM subscriptions WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            },
        )
        .optional()?;
    row.map(subscription_from_row).transpose()
}

#[async_trait]
impl SubscriptionStore for Ledger {
    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<Subscription, BillingError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_s = to_utc_string(&now);
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO subscriptions (
                id, wallet_address, plan_id, token, amount,
                next_payment_at, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                &id,
                &subscription.wallet_address,
                &subscription.plan_id,
                subscription.token.as_str(),
                subscription.amount.to_string(),
                to_utc_string(&subscription.next_payment_at),
                SubscriptionStatus::Active.as_str(),
                &now_s,
                &now_s,
            ],
        )?;
        Ok(Subscription {
            id,
            wallet_address: subscription.wallet_address,
            plan_id: subscription.plan_id,
            token: subscription.token,
            amount: subscription.amount,
            next_payment_at: subscription.next_payment_at,
            status: SubscriptionStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, BillingError> {
        let conn = self.connection.lock().await;
        fetch_subscription(&conn, id)
    }

    async fn select_due(&self, now: DateTime<Utc>) -> Result<Vec<DueCharge>, BillingError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.wallet_address, s.status, s.next_payment_at,
                    p.onchain_plan_id, p.billing_interval_secs
             FROM subscriptions s
             JOIN plans p ON p.id = s.plan_id
             WHERE s.status IN (?1, ?2) AND s.next_payment_at <= ?3
             ORDER BY s.next_payment_at ASC",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![
                SubscriptionStatus::Active.as_str(),
                SubscriptionStatus::PastDue.as_str(),
                to_utc_string(&now)
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )?;

        let mut due = Vec::new();
        for row in rows {
            let (subscription_id, wallet_address, status, next_payment_at, onchain_plan_id, interval) =
                row?;
            let status = SubscriptionStatus::parse(&status)
                .ok_or_else(|| BillingError::Data(format!("unknown subscription status: {status}")))?;
            let onchain_plan_id = u64::try_from(onchain_plan_id)
                .map_err(|_| BillingError::Data(format!("bad on-chain plan id: {onchain_plan_id}")))?;
            due.push(DueCharge {
                subscription_id,
                wallet_address,
                status,
                next_payment_at: parse_utc_string(&next_payment_at)?,
                onchain_plan_id,
                billing_interval_secs: interval,
            });
        }
        Ok(due)
    }

    async fn set_status_and_next_payment(
        &self,
        id: &str,
        status: SubscriptionStatus,
        next_payment_at: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        let now_s = to_utc_string(&Utc::now());
        let conn = self.connection.lock().await;
        let updated = conn.execute(
            "UPDATE subscriptions SET status = ?1, next_payment_at = ?2, updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![status.as_str(), to_utc_string(&next_payment_at), &now_s, id],
        )?;
        if updated == 0 {
            return Err(BillingError::NotFound(format!("subscription {id} not found")));
        }
        Ok(())
    }

    async fn cancel_subscription(&self, id: &str) -> Result<Subscription, BillingError> {
        let now_s = to_utc_string(&Utc::now());
        let conn = self.connection.lock().await;
        let status: Option<String> = conn
            .query_row("SELECT status FROM subscriptions WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(status) = status else {
            return Err(BillingError::NotFound(format!("subscription {id} not found")));
        };
        if status == SubscriptionStatus::Canceled.as_str() {
            return Err(BillingError::Conflict("subscription already canceled".into()));
        }
        conn.execute(
            "UPDATE subscriptions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![SubscriptionStatus::Canceled.as_str(), &now_s, id],
        )?;
        fetch_subscription(&conn, id)?
            .ok_or_else(|| BillingError::NotFound(format!("subscription {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::{Plan, PlanStore};
    use crate::storage::Ledger;
    use chrono::{Duration, TimeZone};

    async fn open_ledger() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("billing.db");
        let ledger = Ledger::open(path.to_str().unwrap()).await.unwrap();
        (dir, ledger)
    }

    fn plan(id: &str, onchain_plan_id: u64) -> Plan {
        Plan {
            id: id.to_string(),
            name: "Basic".into(),
            onchain_plan_id,
            token: PayToken::Usdc,
            amount: 5_000_000,
            billing_interval_secs: 2_592_000,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn new_subscription(wallet: &str, plan_id: &str, due_at: DateTime<Utc>) -> NewSubscription {
        NewSubscription {
            wallet_address: wallet.to_string(),
            plan_id: plan_id.to_string(),
            token: PayToken::Usdc,
            amount: 5_000_000,
            next_payment_at: due_at,
        }
    }

    #[tokio::test]
    async fn create_and_get_round_trips() {
        let (_dir, ledger) = open_ledger().await;
        ledger.insert_plan(plan("p1", 4)).await.unwrap();
        let due = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let created = ledger
            .create_subscription(new_subscription("0xabc0000000000000000000000000000000000001", "p1", due))
            .await
            .unwrap();

        let fetched = ledger.get_subscription(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SubscriptionStatus::Active);
        assert_eq!(fetched.token, PayToken::Usdc);
        assert_eq!(fetched.amount, 5_000_000);
        assert_eq!(fetched.next_payment_at, due);
    }

    #[tokio::test]
    async fn select_due_filters_and_orders_by_due_date() {
        let (_dir, ledger) = open_ledger().await;
        ledger.insert_plan(plan("p1", 4)).await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let later = ledger
            .create_subscription(new_subscription(
                "0xabc0000000000000000000000000000000000001",
                "p1",
                now - Duration::days(1),
            ))
            .await
            .unwrap();
        let earlier = ledger
            .create_subscription(new_subscription(
                "0xabc0000000000000000000000000000000000002",
                "p1",
                now - Duration::days(30),
            ))
            .await
            .unwrap();
        // Not yet due.
        ledger
            .create_subscription(new_subscription(
                "0xabc0000000000000000000000000000000000003",
                "p1",
                now + Duration::days(1),
            ))
            .await
            .unwrap();

        let due = ledger.select_due(now).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].subscription_id, earlier.id);
        assert_eq!(due[1].subscription_id, later.id);
        assert_eq!(due[0].onchain_plan_id, 4);
        assert_eq!(due[0].billing_interval_secs, 2_592_000);
    }

    #[tokio::test]
    async fn past_due_subscriptions_are_still_selected() {
        let (_dir, ledger) = open_ledger().await;
        ledger.insert_plan(plan("p1", 4)).await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let sub = ledger
            .create_subscription(new_subscription(
                "0xabc0000000000000000000000000000000000001",
                "p1",
                now - Duration::days(1),
            ))
            .await
            .unwrap();

        // A failed charge leaves the item overdue, still eligible for the
        // automatic retry on the next sweep.
        ledger
            .set_status_and_next_payment(&sub.id, SubscriptionStatus::PastDue, sub.next_payment_at)
            .await
            .unwrap();
        let due = ledger.select_due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].status, SubscriptionStatus::PastDue);

        ledger.cancel_subscription(&sub.id).await.unwrap();
        assert!(ledger.select_due(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_is_terminal() {
        let (_dir, ledger) = open_ledger().await;
        ledger.insert_plan(plan("p1", 4)).await.unwrap();
        let sub = ledger
            .create_subscription(new_subscription(
                "0xabc0000000000000000000000000000000000001",
                "p1",
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            ))
            .await
            .unwrap();

        let canceled = ledger.cancel_subscription(&sub.id).await.unwrap();
        assert_eq!(canceled.status, SubscriptionStatus::Canceled);

        let again = ledger.cancel_subscription(&sub.id).await.unwrap_err();
        assert!(matches!(again, BillingError::Conflict(_)));
    }

    #[tokio::test]
    async fn updating_a_missing_subscription_is_not_found() {
        let (_dir, ledger) = open_ledger().await;
        let err = ledger
            .set_status_and_next_payment(
                "missing",
                SubscriptionStatus::Active,
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }
}
