pub mod memory;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use trait_def::{AggregationStore, StorageError, StorageResult};

use crate::config::{DatabaseBackend, DatabaseConfig};
use std::sync::Arc;
use tracing::info;

/// Open and initialize the configured backend
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn AggregationStore>> {
    let store: Arc<dyn AggregationStore> = match config.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage at {}", config.url);
            Arc::new(SqliteStore::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStore::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Memory => {
            info!("Using in-memory storage; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    store.init().await?;
    Ok(store)
}
