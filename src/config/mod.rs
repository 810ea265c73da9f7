mod settings;

pub use settings::{
    ApiConfig, CircuitBreakerSettings, DatabaseConfig, OfflineConfig, OtelConfig,
    ProcessorSettings, RetrySettings, ServerConfig, Settings, StoreBackend, StoreConfig,
    TransportConfig,
};
