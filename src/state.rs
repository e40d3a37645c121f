//! Key-value state table. Holds the published aggregated report, its
//! version stamp, and the persistent item-type cache — the pieces of
//! collector state that must survive a restart.

use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::{entities::AggregatedReport, error::CollectorError};

pub const STOCK_DATA: &str = "stock_data";
pub const STOCK_DATA_VERSION: &str = "stock_data_version";
pub const ITEM_TYPE_CACHE: &str = "item_type_cache";
pub const COUNTRY_FILTER: &str = "country_filter";

#[derive(Debug, Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    pub async fn open(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS app_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CollectorError> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT value FROM app_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CollectorError> {
        let raw = serde_json::to_string(value)?;
        sqlx::query("INSERT OR REPLACE INTO app_state (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(raw)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Writes the aggregated report and the bumped version stamp in one
    /// transaction, returning the new version.
    pub async fn publish_report(&self, report: &AggregatedReport) -> Result<i64, CollectorError> {
        let report_raw = serde_json::to_string(report)?;
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT value FROM app_state WHERE key = ?")
                .bind(STOCK_DATA_VERSION)
                .fetch_optional(&mut tx)
                .await?;
        let version = current
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0)
            + 1;

        sqlx::query("INSERT OR REPLACE INTO app_state (key, value) VALUES (?, ?)")
            .bind(STOCK_DATA)
            .bind(report_raw)
            .execute(&mut tx)
            .await?;
        sqlx::query("INSERT OR REPLACE INTO app_state (key, value) VALUES (?, ?)")
            .bind(STOCK_DATA_VERSION)
            .bind(version.to_string())
            .execute(&mut tx)
            .await?;

        tx.commit().await?;
        Ok(version)
    }

    pub async fn item_types(&self) -> Result<HashMap<i64, String>, CollectorError> {
        Ok(self
            .get::<HashMap<i64, String>>(ITEM_TYPE_CACHE)
            .await?
            .unwrap_or_default())
    }

    pub async fn set_item_types(&self, types: &HashMap<i64, String>) -> Result<(), CollectorError> {
        self.set(ITEM_TYPE_CACHE, types).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::StockReportEntry;

    async fn store() -> StateStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        StateStore::open(pool).await.unwrap()
    }

    #[tokio::test]
    async fn roundtrips_values() {
        let store = store().await;
        assert!(store.get::<Vec<String>>(COUNTRY_FILTER).await.unwrap().is_none());

        store
            .set(COUNTRY_FILTER, &vec!["mex".to_owned(), "can".to_owned()])
            .await
            .unwrap();
        let filter: Vec<String> = store.get(COUNTRY_FILTER).await.unwrap().unwrap();
        assert_eq!(filter, vec!["mex", "can"]);
    }

    #[tokio::test]
    async fn publish_bumps_the_version() {
        let store = store().await;
        let mut report = AggregatedReport::new();
        report.insert(
            "mex".into(),
            vec![StockReportEntry {
                id: 268,
                name: "Teddy Bear Plushie".into(),
                cost: 400,
                flight_time_minutes: 26,
                quantity: 500,
                market_price: 35_000,
                profit_per_minute: 1331.0,
                timestamp: 1_700_000_000,
                item_type: "Plushie".into(),
            }],
        );

        assert_eq!(store.publish_report(&report).await.unwrap(), 1);
        assert_eq!(store.publish_report(&report).await.unwrap(), 2);

        let stored: AggregatedReport = store.get(STOCK_DATA).await.unwrap().unwrap();
        assert_eq!(stored["mex"].len(), 1);
        let version: i64 = store.get(STOCK_DATA_VERSION).await.unwrap().unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn item_types_default_to_empty() {
        let store = store().await;
        assert!(store.item_types().await.unwrap().is_empty());

        let mut types = HashMap::new();
        types.insert(268, "Plushie".to_owned());
        store.set_item_types(&types).await.unwrap();
        assert_eq!(store.item_types().await.unwrap()[&268], "Plushie");
    }
}
