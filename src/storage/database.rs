use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::BillingError;

/// Single handle to the billing ledger. Owns the SQLite connection; all
/// store traits are implemented on this type. Writes serialize through the
/// connection mutex.
#[derive(Clone)]
pub struct Ledger {
    pub(crate) connection: Arc<Mutex<Connection>>,
}

impl Ledger {
    pub async fn open(database_path: &str) -> Result<Self, BillingError> {
        // 确保数据库文件的目录存在
        if let Some(parent) = std::path::Path::new(database_path).parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created ledger directory: {}", parent.display());
            }
        }

        let conn = Connection::open(database_path)?;
        tracing::info!("Ledger initialized at: {}", database_path);

        conn.execute(
            "CREATE TABLE IF NOT EXISTS plans (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                onchain_plan_id INTEGER NOT NULL,
                token TEXT NOT NULL,
                amount TEXT NOT NULL,
                billing_interval_secs INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                id TEXT PRIMARY KEY,
                wallet_address TEXT NOT NULL,
                plan_id TEXT NOT NULL,
                token TEXT NOT NULL,
                amount TEXT NOT NULL,
                next_payment_at TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_due
             ON subscriptions (status, next_payment_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS billing_log (
                id TEXT PRIMARY KEY,
                subscription_id TEXT NOT NULL,
                tx_hash TEXT,
                outcome TEXT NOT NULL,
                reason TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_billing_log_subscription
             ON billing_log (subscription_id, created_at)",
            [],
        )?;

        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }
}
