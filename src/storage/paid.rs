//! Paid-bet ledger (SQLite).
//!
//! One row per bet whose payout command was dispatched, keyed by the bet's
//! transaction hash (`cashout:<hash>` for bankroll sweeps). Checked before
//! every payout so a bet replayed from the backlog is never paid twice.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{Outcome, PayoutDecision};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS paid_bets (
    key           TEXT PRIMARY KEY,
    destination   TEXT NOT NULL,
    outcome       TEXT NOT NULL,
    payout_drops  INTEGER NOT NULL,
    ledger_index  INTEGER NOT NULL,
    submit_id     INTEGER,
    engine_result TEXT,
    paid_at       TEXT NOT NULL
)
"#;

/// `outcome` column value for bankroll sweeps.
const CASHOUT_KIND: &str = "CASHOUT";

/// Key for the bankroll sweep that follows a bet.
pub fn cashout_key(bet_hash: &str) -> String {
    format!("cashout:{bet_hash}")
}

/// A stored payout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaidRecord {
    pub key: String,
    pub destination: String,
    /// None for a bankroll sweep.
    pub outcome: Option<Outcome>,
    pub payout_drops: u64,
    pub ledger_index: u64,
    pub submit_id: Option<u64>,
    /// Filled in when the node acknowledges the submit.
    pub engine_result: Option<String>,
    pub paid_at: DateTime<Utc>,
}

impl PaidRecord {
    pub fn from_decision(decision: &PayoutDecision, ledger_index: u64, submit_id: u64) -> Self {
        Self {
            key: decision.bet_ref.clone(),
            destination: decision.destination.clone(),
            outcome: Some(decision.outcome),
            payout_drops: decision.payout_drops,
            ledger_index,
            submit_id: Some(submit_id),
            engine_result: None,
            paid_at: Utc::now(),
        }
    }

    pub fn cashout(bet_hash: &str, target: &str, drops: u64, ledger_index: u64, submit_id: u64) -> Self {
        Self {
            key: cashout_key(bet_hash),
            destination: target.to_string(),
            outcome: None,
            payout_drops: drops,
            ledger_index,
            submit_id: Some(submit_id),
            engine_result: None,
            paid_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct PaidLedger {
    pool: SqlitePool,
}

impl PaidLedger {
    /// Open (creating if needed) the database at `url` and migrate.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid paid ledger URL: {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open paid ledger at {url}"))?;

        let ledger = Self { pool };
        ledger.migrate().await?;
        info!(url, paid = ledger.count().await?, "Paid ledger ready");
        Ok(ledger)
    }

    /// Private in-memory database; lives as long as the pool's one connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory paid ledger")?;

        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to create paid_bets table")?;
        Ok(())
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM paid_bets WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to look up paid bet {key}"))?;
        Ok(row.is_some())
    }

    /// Insert a payout. Returns false if the key was already present.
    pub async fn record(&self, record: &PaidRecord) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO paid_bets \
             (key, destination, outcome, payout_drops, ledger_index, submit_id, engine_result, paid_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.key)
        .bind(&record.destination)
        .bind(record.outcome.map_or(CASHOUT_KIND, |o| o.as_str()))
        .bind(to_i64(record.payout_drops)?)
        .bind(to_i64(record.ledger_index)?)
        .bind(record.submit_id.map(to_i64).transpose()?)
        .bind(record.engine_result.as_deref())
        .bind(record.paid_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record paid bet {}", record.key))?;

        let inserted = result.rows_affected() == 1;
        debug!(key = %record.key, inserted, "Paid bet recorded");
        Ok(inserted)
    }

    /// Attach the node's `engine_result` to a recorded payout.
    pub async fn mark_result(&self, key: &str, engine_result: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE paid_bets SET engine_result = ? WHERE key = ?")
            .bind(engine_result)
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to store submit result for {key}"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, key: &str) -> Result<Option<PaidRecord>> {
        let row = sqlx::query(
            "SELECT key, destination, outcome, payout_drops, ledger_index, submit_id, engine_result, paid_at \
             FROM paid_bets WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to read paid bet {key}"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let outcome: String = row.try_get("outcome")?;
        let paid_at: String = row.try_get("paid_at")?;
        let submit_id: Option<i64> = row.try_get("submit_id")?;

        Ok(Some(PaidRecord {
            key: row.try_get("key")?,
            destination: row.try_get("destination")?,
            outcome: match outcome.as_str() {
                CASHOUT_KIND => None,
                other => Some(other.parse()?),
            },
            payout_drops: to_u64(row.try_get("payout_drops")?)?,
            ledger_index: to_u64(row.try_get("ledger_index")?)?,
            submit_id: submit_id.map(to_u64).transpose()?,
            engine_result: row.try_get("engine_result")?,
            paid_at: DateTime::parse_from_rfc3339(&paid_at)
                .with_context(|| format!("Bad paid_at for {key}: {paid_at}"))?
                .with_timezone(&Utc),
        }))
    }

    pub async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query("SELECT COUNT(*) FROM paid_bets")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count paid bets")?
            .try_get(0)?;
        to_u64(n)
    }
}

fn to_i64(v: u64) -> Result<i64> {
    i64::try_from(v).with_context(|| format!("{v} does not fit in an SQLite integer"))
}

fn to_u64(v: i64) -> Result<u64> {
    u64::try_from(v).with_context(|| format!("negative value {v} in paid ledger"))
}
