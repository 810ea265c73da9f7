//! Email store factory

use std::sync::Arc;

use crate::config::{StoreBackend, StoreConfig};
use crate::postgres::PostgresPool;

use super::memory_store::MemoryEmailStore;
use super::postgres_store::PostgresEmailStore;
use super::store::EmailQueueStore;

/// Create an email store based on configuration.
///
/// - `postgres`: a `PostgresEmailStore` if a pool is provided
/// - `memory` (default): a `MemoryEmailStore`
///
/// A Postgres backend without a pool falls back to memory with a warning.
pub fn create_email_store(
    settings: &StoreConfig,
    postgres_pool: Option<&PostgresPool>,
) -> Arc<dyn EmailQueueStore> {
    match settings.backend {
        StoreBackend::Postgres => {
            if let Some(pool) = postgres_pool {
                tracing::info!(backend = "postgres", "Creating PostgreSQL email store");
                Arc::new(PostgresEmailStore::new(pool.pool().clone()))
            } else {
                tracing::warn!(
                    "PostgreSQL store requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryEmailStore::new())
            }
        }
        StoreBackend::Memory => {
            tracing::info!(backend = "memory", "Creating in-memory email store");
            Arc::new(MemoryEmailStore::new())
        }
    }
}
