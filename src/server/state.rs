use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{Settings, StoreBackend};
use crate::email::{
    create_email_store, Clock, EmailQueueStore, EmailTransport, HttpEmailTransport, QueueProcessor,
    SystemClock, TransportError,
};
use crate::postgres::{PostgresPool, PostgresPoolError};
use crate::resilience::{CircuitBreaker, Connectivity, OfflineQueue, RetryConfig, RetryExecutor};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Email transport: {0}")]
    Transport(#[from] TransportError),

    #[error("PostgreSQL: {0}")]
    Postgres(#[from] PostgresPoolError),
}

/// Shared application state.
///
/// Every resilience component is built here and handed out by `Arc`;
/// nothing is a process-wide singleton.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn EmailQueueStore>,
    pub clock: Arc<dyn Clock>,
    pub executor: Arc<RetryExecutor>,
    pub offline_queue: Arc<OfflineQueue>,
    pub processor: Arc<QueueProcessor>,
    pub postgres_pool: Option<PostgresPool>,
    pub start_time: Instant,
}

impl AppState {
    /// Connect to the configured backends and build the state
    pub async fn initialize(settings: Settings) -> Result<Self, StateError> {
        let postgres_pool = match settings.store.backend {
            StoreBackend::Postgres => {
                let pool = PostgresPool::connect(&settings.database).await?;
                pool.migrate().await?;
                Some(pool)
            }
            StoreBackend::Memory => None,
        };

        let store = create_email_store(&settings.store, postgres_pool.as_ref());
        let transport = Arc::new(HttpEmailTransport::new(
            &settings.transport.base_url,
            settings.transport.api_key.clone(),
            Duration::from_secs(settings.transport.timeout_seconds),
        )?);

        let mut state = Self::from_parts(settings, store, transport, Arc::new(SystemClock));
        state.postgres_pool = postgres_pool;
        Ok(state)
    }

    /// Build the state from already constructed collaborators
    pub fn from_parts(
        settings: Settings,
        store: Arc<dyn EmailQueueStore>,
        transport: Arc<dyn EmailTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::with_config((&settings.circuit_breaker).into()));
        let executor = Arc::new(RetryExecutor::new(breaker, RetryConfig::from(&settings.retry)));
        let offline_queue = Arc::new(OfflineQueue::new(executor.clone(), Connectivity::Online));

        let processor = Arc::new(QueueProcessor::new(
            store.clone(),
            transport,
            clock.clone(),
            settings
                .processor
                .to_processor_config(&settings.transport.default_sender),
        ));

        Self {
            settings: Arc::new(settings),
            store,
            clock,
            executor,
            offline_queue,
            processor,
            postgres_pool: None,
            start_time: Instant::now(),
        }
    }
}
