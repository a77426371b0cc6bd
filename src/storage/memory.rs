use crate::analytics::estimator::Estimator;
use crate::analytics::fingerprint::Fingerprint;
use crate::analytics::models::{AggregationRow, Dimension, DimensionKey};
use crate::storage::{AggregationStore, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

/// Process-local store for tests, demos and the `memory` backend
///
/// Each key is guarded by its DashMap shard lock for the duration of the
/// merge, so concurrent upserts on one key serialize.
#[derive(Default)]
pub struct MemoryStore {
    rows: DashMap<(Dimension, DimensionKey), Estimator>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows across all tables
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl AggregationStore for MemoryStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn merge_upsert(
        &self,
        table: Dimension,
        key: &DimensionKey,
        fingerprint: &Fingerprint,
    ) -> StorageResult<()> {
        self.rows
            .entry((table, key.clone()))
            .or_default()
            .add(fingerprint.as_ref());
        Ok(())
    }

    async fn read_range(
        &self,
        table: Dimension,
        domain: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StorageResult<Vec<AggregationRow>> {
        let mut rows: Vec<AggregationRow> = self
            .rows
            .iter()
            .filter(|entry| {
                let (dimension, key) = entry.key();
                *dimension == table && key.domain == domain && key.day >= start && key.day <= end
            })
            .map(|entry| AggregationRow {
                key: entry.key().1.clone(),
                estimator: entry.value().clone(),
            })
            .collect();

        rows.sort_by(|a, b| {
            b.key
                .day
                .cmp(&a.key.day)
                .then_with(|| a.key.value.cmp(&b.key.value))
        });
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn fingerprint(n: u32) -> Fingerprint {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&n.to_be_bytes());
        Fingerprint::from(bytes)
    }

    #[tokio::test]
    async fn test_upsert_creates_then_merges() {
        let store = MemoryStore::new();
        let key = DimensionKey::new("example.com", "/", day(1));

        store
            .merge_upsert(Dimension::Pages, &key, &fingerprint(1))
            .await
            .unwrap();
        store
            .merge_upsert(Dimension::Pages, &key, &fingerprint(2))
            .await
            .unwrap();
        store
            .merge_upsert(Dimension::Pages, &key, &fingerprint(1))
            .await
            .unwrap();

        let rows = store
            .read_range(Dimension::Pages, "example.com", day(1), day(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].estimator.cardinality(), 2);
    }

    #[tokio::test]
    async fn test_tables_and_domains_are_isolated() {
        let store = MemoryStore::new();
        let page = DimensionKey::new("example.com", "/", day(1));
        let other = DimensionKey::new("other.org", "/", day(1));

        store
            .merge_upsert(Dimension::Pages, &page, &fingerprint(1))
            .await
            .unwrap();
        store
            .merge_upsert(Dimension::Sources, &page, &fingerprint(1))
            .await
            .unwrap();
        store
            .merge_upsert(Dimension::Pages, &other, &fingerprint(1))
            .await
            .unwrap();

        assert_eq!(store.len(), 3);
        let rows = store
            .read_range(Dimension::Pages, "example.com", day(1), day(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(store
            .read_range(Dimension::Countries, "example.com", day(1), day(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_read_range_bounds_and_order() {
        let store = MemoryStore::new();
        for d in 1..=5 {
            let key = DimensionKey::new("example.com", "/", day(d));
            store
                .merge_upsert(Dimension::Pages, &key, &fingerprint(d))
                .await
                .unwrap();
        }

        let rows = store
            .read_range(Dimension::Pages, "example.com", day(2), day(4))
            .await
            .unwrap();
        let days: Vec<NaiveDate> = rows.iter().map(|r| r.key.day).collect();
        assert_eq!(days, vec![day(4), day(3), day(2)]);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_lose_nothing() {
        let store = Arc::new(MemoryStore::new());
        let key = DimensionKey::new("example.com", "/", day(1));

        let mut handles = vec![];
        for n in 0..100 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store
                    .merge_upsert(Dimension::Pages, &key, &fingerprint(n))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let rows = store
            .read_range(Dimension::Pages, "example.com", day(1), day(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let mut expected = Estimator::empty();
        for n in 0..100 {
            expected.add(fingerprint(n).as_ref());
        }
        assert_eq!(rows[0].estimator, expected);
    }
}
