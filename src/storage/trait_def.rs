use crate::analytics::estimator::EstimatorError;
use crate::analytics::fingerprint::Fingerprint;
use crate::analytics::models::{AggregationRow, Dimension, DimensionKey};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("stored visitor estimator is unusable: {0}")]
    Estimator(#[from] EstimatorError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Other(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait AggregationStore: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Fold one visitor fingerprint into the row for `key`, creating it if absent
    ///
    /// Must be atomic against concurrent callers hitting the same key: no
    /// observation may be lost and two rows may never be created.
    async fn merge_upsert(
        &self,
        table: Dimension,
        key: &DimensionKey,
        fingerprint: &Fingerprint,
    ) -> StorageResult<()>;

    /// All rows of `table` for `domain` with `start <= day <= end`, newest day first
    async fn read_range(
        &self,
        table: Dimension,
        domain: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StorageResult<Vec<AggregationRow>>;
}
