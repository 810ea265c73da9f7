use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{broadcast, watch};

use warranty_mail_pipeline::config::Settings;
use warranty_mail_pipeline::resilience::Connectivity;
use warranty_mail_pipeline::server::{create_app, AppState};
use warranty_mail_pipeline::tasks::{ConnectivityMonitor, ProcessorTask};
use warranty_mail_pipeline::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing; the guard flushes spans on drop
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!(store = ?settings.store.backend, "Configuration loaded");

    // Create application state
    let state = AppState::initialize(settings.clone()).await?;
    if let Some(pool) = &state.postgres_pool {
        tracing::info!(database_url = %pool.database_url_masked(), "PostgreSQL store ready");
    }
    tracing::info!(backend = state.store.backend_type(), "Application state initialized");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Connectivity changes flow from the monitor to the offline queue
    let (connectivity_tx, connectivity_rx) = watch::channel(Connectivity::Online);
    let listener_handle = state.offline_queue.spawn_listener(connectivity_rx);

    let monitor = ConnectivityMonitor::new(
        state.store.clone(),
        Duration::from_secs(settings.offline.probe_interval_seconds),
        connectivity_tx,
        shutdown_tx.subscribe(),
    );
    let monitor_handle = tokio::spawn(async move {
        monitor.run().await;
    });

    let processor_handle = if settings.processor.schedule_enabled {
        let task = ProcessorTask::new(
            state.processor.clone(),
            Duration::from_secs(settings.processor.interval_seconds),
            shutdown_tx.subscribe(),
        );
        Some(tokio::spawn(async move {
            task.run().await;
        }))
    } else {
        tracing::info!("Scheduled processing disabled, passes run via POST /api/v1/queue/process");
        None
    };

    // Create Axum app
    let pool = state.postgres_pool.clone();
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = monitor_handle.await;
    if let Some(handle) = processor_handle {
        let _ = handle.await;
    }
    let _ = listener_handle.await;

    if let Some(pool) = pool {
        pool.close().await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop the processor and connectivity monitor
    let _ = shutdown_tx.send(());
}
