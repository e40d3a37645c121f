//! Durable quantity snapshot log. One row per
//! `(timestamp, country, item_id)`; a colliding write updates in place
//! so a re-delivered feed tick never duplicates a row.

use sqlx::SqlitePool;
use std::time::Duration;
use tracing::warn;

use crate::{
    entities::StockSnapshot,
    error::CollectorError,
    util::now_epoch,
    validation::ValidationError,
};

const SAVE_ATTEMPTS: u64 = 3;

#[derive(Debug, Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn open(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS stock_history (
                timestamp INTEGER NOT NULL,
                country TEXT NOT NULL,
                item_id INTEGER NOT NULL,
                quantity INTEGER NOT NULL,
                trend REAL,
                near_restock INTEGER,
                created_at TEXT NOT NULL,
                PRIMARY KEY (timestamp, country, item_id)
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS by_item ON stock_history (country, item_id)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS by_timestamp ON stock_history (timestamp)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS by_country ON stock_history (country)")
            .execute(&pool)
            .await?;
        Ok(Self { pool })
    }

    /// Upserts one snapshot. Transient storage failures are retried
    /// with linear backoff before the error propagates.
    pub async fn save_snapshot(&self, snapshot: &StockSnapshot) -> Result<(), CollectorError> {
        if snapshot.country.is_empty() {
            return Err(ValidationError::SnapshotField("country").into());
        }
        if snapshot.item_id <= 0 {
            return Err(ValidationError::SnapshotField("item_id").into());
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.upsert(snapshot).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < SAVE_ATTEMPTS => {
                    warn!(
                        attempt,
                        country = %snapshot.country,
                        item_id = snapshot.item_id,
                        "snapshot write failed, retrying: {err}"
                    );
                    tokio::time::sleep(Duration::from_secs(attempt)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn upsert(&self, snapshot: &StockSnapshot) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO stock_history
                (timestamp, country, item_id, quantity, trend, near_restock, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (timestamp, country, item_id) DO UPDATE SET
                quantity = excluded.quantity,
                trend = excluded.trend,
                near_restock = excluded.near_restock,
                created_at = excluded.created_at",
        )
        .bind(snapshot.timestamp)
        .bind(&snapshot.country)
        .bind(snapshot.item_id)
        .bind(snapshot.quantity)
        .bind(snapshot.trend)
        .bind(snapshot.near_restock)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All snapshots for an item within the inclusive time bound,
    /// oldest first.
    pub async fn query_range(
        &self,
        country: &str,
        item_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<StockSnapshot>, sqlx::Error> {
        sqlx::query_as::<_, StockSnapshot>(
            "SELECT * FROM stock_history
            WHERE country = ? AND item_id = ? AND timestamp BETWEEN ? AND ?
            ORDER BY timestamp ASC",
        )
        .bind(country)
        .bind(item_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
    }

    /// The most recent snapshot at or before now, if any.
    pub async fn query_latest(
        &self,
        country: &str,
        item_id: i64,
    ) -> Result<Option<StockSnapshot>, sqlx::Error> {
        sqlx::query_as::<_, StockSnapshot>(
            "SELECT * FROM stock_history
            WHERE country = ? AND item_id = ? AND timestamp <= ?
            ORDER BY timestamp DESC
            LIMIT 1",
        )
        .bind(country)
        .bind(item_id)
        .bind(now_epoch())
        .fetch_optional(&self.pool)
        .await
    }
}
