use async_trait::async_trait;
use rusqlite::OptionalExtension;

use crate::error::BillingError;
use crate::plans::{Plan, PlanStore};
use crate::storage::database::Ledger;
use crate::storage::time::{parse_utc_string, to_utc_string};
use crate::subscriptions::PayToken;

type PlanRow = (String, String, i64, String, String, i64, String);

fn plan_from_row(row: PlanRow) -> Result<Plan, BillingError> {
    let (id, name, onchain_plan_id, token, amount, billing_interval_secs, created_at) = row;
    let onchain_plan_id = u64::try_from(onchain_plan_id)
        .map_err(|_| BillingError::Data(format!("bad on-chain plan id: {onchain_plan_id}")))?;
    let token = PayToken::parse(&token)
        .ok_or_else(|| BillingError::Data(format!("unknown pay token: {token}")))?;
    let amount = amount
        .parse::<u128>()
        .map_err(|_| BillingError::Data(format!("bad amount: {amount}")))?;
    Ok(Plan {
        id,
        name,
        onchain_plan_id,
        token,
        amount,
        billing_interval_secs,
        created_at: parse_utc_string(&created_at)?,
    })
}

#[async_trait]
impl PlanStore for Ledger {
    async fn get_plan(&self, id: &str) -> Result<Option<Plan>, BillingError> {
        let conn = self.connection.lock().await;
        let row: Option<PlanRow> = conn
            .query_row(
                "SELECT id, name, onchain_plan_id, token, amount, billing_interval_secs, created_at
                 FROM plans WHERE id = ?1",
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
                    ))
                },
            )
            .optional()?;
        row.map(plan_from_row).transpose()
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, BillingError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, onchain_plan_id, token, amount, billing_interval_secs, created_at
             FROM plans ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?;

        let mut plans = Vec::new();
        for row in rows {
            plans.push(plan_from_row(row?)?);
        }
        Ok(plans)
    }

    async fn insert_plan(&self, plan: Plan) -> Result<(), BillingError> {
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO plans (id, name, onchain_plan_id, token, amount, billing_interval_secs, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                &plan.id,
                &plan.name,
                i64::try_from(plan.onchain_plan_id)
                    .map_err(|_| BillingError::Data("on-chain plan id out of range".into()))?,
                plan.token.as_str(),
                plan.amount.to_string(),
                plan.billing_interval_secs,
                to_utc_string(&plan.created_at),
            ],
        )?;
        Ok(())
    }
}
