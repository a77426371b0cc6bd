//! Read side: turns stored estimators into visitor counts

use chrono::{Duration, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::analytics::estimator::Estimator;
use crate::analytics::models::{AggregationRow, Dimension, StatRow, StatsQuery};
use crate::storage::{AggregationStore, StorageError};

/// Days before today covered when the caller gives no start day
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to read stats: {0}")]
    Storage(#[from] StorageError),
    #[error("aggregate mode is only available for pages, not {0}")]
    AggregateUnsupported(Dimension),
}

/// `(today - 30 days, today)` in UTC, inclusive on both ends
pub fn default_window() -> (NaiveDate, NaiveDate) {
    window_ending(Utc::now().date_naive())
}

fn window_ending(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today - Duration::days(DEFAULT_WINDOW_DAYS), today)
}

pub struct QueryService {
    store: Arc<dyn AggregationStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn AggregationStore>) -> Self {
        Self { store }
    }

    pub async fn query(&self, query: &StatsQuery) -> Result<Vec<StatRow>, QueryError> {
        if query.aggregate && query.table != Dimension::Pages {
            return Err(QueryError::AggregateUnsupported(query.table));
        }

        if query.start_day > query.end_day {
            return Ok(Vec::new());
        }

        let rows = self
            .store
            .read_range(query.table, &query.domain, query.start_day, query.end_day)
            .await?;

        if query.aggregate {
            Ok(aggregate_by_day(&rows)?)
        } else {
            Ok(per_value(rows))
        }
    }
}

/// One row per stored key, newest day first, busiest value first within a day
fn per_value(rows: Vec<AggregationRow>) -> Vec<StatRow> {
    let mut stats: Vec<StatRow> = rows
        .into_iter()
        .map(|row| StatRow {
            visitors: row.estimator.cardinality(),
            value: Some(row.key.value),
            day: row.key.day,
        })
        .collect();

    stats.sort_by(|a, b| {
        b.day
            .cmp(&a.day)
            .then_with(|| b.visitors.cmp(&a.visitors))
            .then_with(|| a.value.cmp(&b.value))
    });
    stats
}

/// Union of every path's visitors per day
///
/// Merging before counting means a visitor on several paths counts once.
fn aggregate_by_day(rows: &[AggregationRow]) -> Result<Vec<StatRow>, StorageError> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&Estimator>> = BTreeMap::new();
    for row in rows {
        by_day.entry(row.key.day).or_default().push(&row.estimator);
    }

    by_day
        .into_iter()
        .rev()
        .map(|(day, estimators)| -> Result<StatRow, StorageError> {
            let merged = Estimator::merge_all(estimators)?;
            Ok(StatRow {
                value: None,
                day,
                visitors: merged.cardinality(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::fingerprint::Fingerprint;
    use crate::analytics::models::DimensionKey;
    use crate::storage::MemoryStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
    }

    fn fingerprint(n: u32) -> Fingerprint {
        let mut bytes = [0u8; 32];
        bytes[28..].copy_from_slice(&n.to_be_bytes());
        Fingerprint::from(bytes)
    }

    async fn record(store: &MemoryStore, table: Dimension, value: &str, d: u32, visitor: u32) {
        store
            .merge_upsert(
                table,
                &DimensionKey::new("example.com", value, day(d)),
                &fingerprint(visitor),
            )
            .await
            .unwrap();
    }

    fn stats_query(table: Dimension, aggregate: bool) -> StatsQuery {
        StatsQuery {
            table,
            domain: "example.com".to_string(),
            start_day: day(1),
            end_day: day(31),
            aggregate,
        }
    }

    #[tokio::test]
    async fn test_per_path_counts_and_order() {
        let store = Arc::new(MemoryStore::new());
        for visitor in 0..3 {
            record(&store, Dimension::Pages, "/a", 2, visitor).await;
        }
        record(&store, Dimension::Pages, "/b", 2, 0).await;
        record(&store, Dimension::Pages, "/c", 3, 0).await;

        let service = QueryService::new(store);
        let rows = service
            .query(&stats_query(Dimension::Pages, false))
            .await
            .unwrap();

        let summary: Vec<(Option<&str>, NaiveDate, u64)> = rows
            .iter()
            .map(|r| (r.value.as_deref(), r.day, r.visitors))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Some("/c"), day(3), 1),
                (Some("/a"), day(2), 3),
                (Some("/b"), day(2), 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_aggregate_counts_each_visitor_once() {
        let store = Arc::new(MemoryStore::new());
        record(&store, Dimension::Pages, "/a", 5, 1).await;
        record(&store, Dimension::Pages, "/b", 5, 1).await;
        record(&store, Dimension::Pages, "/b", 5, 2).await;
        record(&store, Dimension::Pages, "/a", 6, 3).await;

        let service = QueryService::new(store);
        let rows = service
            .query(&stats_query(Dimension::Pages, true))
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![
                StatRow {
                    value: None,
                    day: day(6),
                    visitors: 1
                },
                StatRow {
                    value: None,
                    day: day(5),
                    visitors: 2
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_aggregate_rejected_for_secondary_tables() {
        let service = QueryService::new(Arc::new(MemoryStore::new()));

        for table in [Dimension::Countries, Dimension::Sources] {
            assert!(matches!(
                service.query(&stats_query(table, true)).await,
                Err(QueryError::AggregateUnsupported(t)) if t == table
            ));
        }
    }

    #[tokio::test]
    async fn test_inverted_range_and_unknown_domain_are_empty() {
        let store = Arc::new(MemoryStore::new());
        record(&store, Dimension::Countries, "DE", 10, 1).await;
        let service = QueryService::new(store);

        let mut query = stats_query(Dimension::Countries, false);
        query.start_day = day(20);
        query.end_day = day(10);
        assert!(service.query(&query).await.unwrap().is_empty());

        let mut query = stats_query(Dimension::Countries, false);
        query.domain = "unknown.test".to_string();
        assert!(service.query(&query).await.unwrap().is_empty());

        let rows = service
            .query(&stats_query(Dimension::Countries, false))
            .await
            .unwrap();
        assert_eq!(rows[0].value.as_deref(), Some("DE"));
    }

    #[test]
    fn test_default_window() {
        let (start, end) = window_ending(day(31));
        assert_eq!(end, day(31));
        assert_eq!(start, day(1));
    }
}
