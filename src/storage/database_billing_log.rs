use async_trait::async_trait;
use chrono::Utc;

use crate::billing_log::{BillingLogEntry, BillingLogStore, BillingOutcome};
use crate::error::BillingError;
use crate::storage::database::Ledger;
use crate::storage::time::{parse_utc_string, to_utc_string};

#[async_trait]
impl BillingLogStore for Ledger {
    async fn insert_billing_log(
        &self,
        subscription_id: &str,
        tx_hash: Option<&str>,
        outcome: BillingOutcome,
        reason: Option<&str>,
    ) -> Result<BillingLogEntry, BillingError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO billing_log (id, subscription_id, tx_hash, outcome, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                &id,
                subscription_id,
                tx_hash,
                outcome.as_str(),
                reason,
                to_utc_string(&now),
            ],
        )?;
        Ok(BillingLogEntry {
            id,
            subscription_id: subscription_id.to_string(),
            tx_hash: tx_hash.map(str::to_string),
            outcome,
            reason: reason.map(str::to_string),
            created_at: now,
        })
    }

    async fn list_billing_log(
        &self,
        subscription_id: &str,
    ) -> Result<Vec<BillingLogEntry>, BillingError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, subscription_id, tx_hash, outcome, reason, created_at
             FROM billing_log WHERE subscription_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([subscription_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, subscription_id, tx_hash, outcome, reason, created_at) = row?;
            let outcome = BillingOutcome::parse(&outcome)
                .ok_or_else(|| BillingError::Data(format!("unknown billing outcome: {outcome}")))?;
            entries.push(BillingLogEntry {
                id,
                subscription_id,
                tx_hash,
                outcome,
                reason,
                created_at: parse_utc_string(&created_at)?,
            });
        }
        Ok(entries)
    }

    async fn tx_hash_seen(&self, tx_hash: &str) -> Result<bool, BillingError> {
        let conn = self.connection.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM billing_log WHERE tx_hash = ?1",
            [tx_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
