//! Durable email queue and its processor
//!
//! - `EmailQueueStore`: storage trait with memory and PostgreSQL backends
//! - `QueueProcessor`: sequential delivery passes over due messages
//! - `EmailTransport`: outbound provider client
//! - `retry_delay_for`: the fixed retry backoff ladder

mod clock;
mod factory;
mod ladder;
mod memory_store;
mod models;
mod postgres_store;
mod processor;
mod store;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use factory::create_email_store;
pub use ladder::{retry_delay_for, RETRY_LADDER_MINUTES};
pub use memory_store::MemoryEmailStore;
pub use models::{
    Attachment, DeliveryOutcome, MessageStatus, NewMessage, Priority, QueuedMessage, StoreError,
    StoreStats, DEFAULT_MAX_RETRIES, PROVIDER_MESSAGE_ID_KEY,
};
pub use postgres_store::PostgresEmailStore;
pub use processor::{
    PassTrigger, ProcessingSummary, ProcessorConfig, ProcessorError, QueueProcessor,
    DEFAULT_BATCH_SIZE,
};
pub use store::EmailQueueStore;
pub use transport::{
    EmailTransport, HttpEmailTransport, OutboundAttachment, OutboundEmail, TransportError,
    TransportReceipt,
};
