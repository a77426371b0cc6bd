use crate::analytics::estimator::Estimator;
use crate::analytics::fingerprint::Fingerprint;
use crate::analytics::models::{AggregationRow, Dimension, DimensionKey};
use crate::storage::{AggregationStore, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl SqliteStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl AggregationStore for SqliteStore {
    async fn init(&self) -> Result<()> {
        for table in Dimension::ALL {
            let name = table.table_name();
            let column = table.column();

            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {name} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    domain TEXT NOT NULL,
                    {column} TEXT NOT NULL,
                    day DATE NOT NULL,
                    visitors BLOB NOT NULL,
                    UNIQUE (domain, day, {column})
                )
                "#
            ))
            .execute(self.pool.as_ref())
            .await?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{name}_domain_day ON {name}(domain, day)"
            ))
            .execute(self.pool.as_ref())
            .await?;
        }

        Ok(())
    }

    async fn merge_upsert(
        &self,
        table: Dimension,
        key: &DimensionKey,
        fingerprint: &Fingerprint,
    ) -> StorageResult<()> {
        let name = table.table_name();
        let column = table.column();

        let mut seeded = Estimator::empty();
        seeded.add(fingerprint.as_ref());

        // The first statement is a write, so the transaction holds the write
        // lock from here until commit and the read-modify-write below is atomic.
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO {name} (domain, {column}, day, visitors)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (domain, day, {column}) DO NOTHING
            "#
        ))
        .bind(&key.domain)
        .bind(&key.value)
        .bind(key.day)
        .bind(seeded.as_bytes())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            let stored: Vec<u8> = sqlx::query_scalar(&format!(
                r#"
                SELECT visitors FROM {name}
                WHERE domain = ? AND day = ? AND {column} = ?
                "#
            ))
            .bind(&key.domain)
            .bind(key.day)
            .bind(&key.value)
            .fetch_one(&mut *tx)
            .await?;

            let mut estimator = Estimator::from_bytes(&stored)?;
            estimator.add(fingerprint.as_ref());

            sqlx::query(&format!(
                r#"
                UPDATE {name} SET visitors = ?
                WHERE domain = ? AND day = ? AND {column} = ?
                "#
            ))
            .bind(estimator.as_bytes())
            .bind(&key.domain)
            .bind(key.day)
            .bind(&key.value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn read_range(
        &self,
        table: Dimension,
        domain: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StorageResult<Vec<AggregationRow>> {
        let name = table.table_name();
        let column = table.column();

        let rows = sqlx::query(&format!(
            r#"
            SELECT {column} AS value, day, visitors
            FROM {name}
            WHERE domain = ? AND day >= ? AND day <= ?
            ORDER BY day DESC, {column} ASC
            "#
        ))
        .bind(domain)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter()
            .map(|row| -> StorageResult<AggregationRow> {
                let value: String = row.try_get("value")?;
                let day: NaiveDate = row.try_get("day")?;
                let visitors: Vec<u8> = row.try_get("visitors")?;
                Ok(AggregationRow {
                    key: DimensionKey::new(domain, value, day),
                    estimator: Estimator::from_bytes(&visitors)?,
                })
            })
            .collect()
    }
}
