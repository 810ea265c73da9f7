// Resilience layer (shared by every store caller)
pub mod resilience;

// Infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
pub mod telemetry;

// Domain layer
pub mod email;

// Application layer
pub mod api;
pub mod server;
pub mod tasks;
