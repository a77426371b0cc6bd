use crate::analytics::estimator::Estimator;
use crate::analytics::fingerprint::Fingerprint;
use crate::analytics::models::{AggregationRow, Dimension, DimensionKey};
use crate::storage::{AggregationStore, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;

pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl AggregationStore for PostgresStore {
    async fn init(&self) -> Result<()> {
        for table in Dimension::ALL {
            let name = table.table_name();
            let column = table.column();

            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {name} (
                    id BIGSERIAL PRIMARY KEY,
                    domain TEXT NOT NULL,
                    {column} TEXT NOT NULL,
                    day DATE NOT NULL,
                    visitors BYTEA NOT NULL,
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

    /// Single-statement upsert: a new row is seeded with the fingerprint, an
    /// existing one has the target register raised in place on the server.
    async fn merge_upsert(
        &self,
        table: Dimension,
        key: &DimensionKey,
        fingerprint: &Fingerprint,
    ) -> StorageResult<()> {
        let name = table.table_name();
        let column = table.column();

        let mut seeded = Estimator::empty();
        let (index, rho) = seeded.locate(fingerprint.as_ref());
        seeded.add(fingerprint.as_ref());

        sqlx::query(&format!(
            r#"
            INSERT INTO {name} (domain, {column}, day, visitors)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (domain, day, {column}) DO UPDATE
            SET visitors = set_byte(
                {name}.visitors,
                $5,
                GREATEST(get_byte({name}.visitors, $5), $6)
            )
            "#
        ))
        .bind(&key.domain)
        .bind(&key.value)
        .bind(key.day)
        .bind(seeded.as_bytes())
        .bind(index as i32)
        .bind(i32::from(rho))
        .execute(self.pool.as_ref())
        .await?;

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
            WHERE domain = $1 AND day BETWEEN $2 AND $3
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
