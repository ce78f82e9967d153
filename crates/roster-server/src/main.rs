//! Roster Server - Main entry point

use anyhow::Result;
use roster_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

use roster_server::{
    config::Config,
    create_router,
    ingest::{
        ImportOrchestrator, ImportPipeline, LogNotifier, Notifier, PgEntitySink, PgJobStore,
        ReferenceData, WebhookNotifier,
    },
    storage::{config::StorageConfig, Storage},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::default()
        .with_file_prefix("roster-server")
        .with_filter_directives("roster_server=debug,tower_http=debug,sqlx=warn")
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting Roster Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    let storage_config = StorageConfig::from_env()?;
    let storage = Storage::new(storage_config).await?;
    info!(bucket = storage.bucket(), "Storage client initialized");

    let reference = ReferenceData::load(config.import.reference_path.as_deref())?;

    let notifier: Arc<dyn Notifier> = match config.import.notify_webhook_url.as_deref() {
        Some(url) => {
            info!(endpoint = url, "Import notifications go to webhook");
            Arc::new(WebhookNotifier::new(url)?)
        },
        None => Arc::new(LogNotifier),
    };

    let pipeline = ImportPipeline::new(
        Arc::new(PgJobStore::new(db_pool.clone())),
        Arc::new(PgEntitySink::new(db_pool.clone())),
        Arc::new(storage),
        Arc::new(reference),
        Arc::new(config.import.clone()),
    )?;
    let orchestrator = ImportOrchestrator::new(pipeline, notifier);

    // Nothing from a previous process is still running
    orchestrator.recover_interrupted().await?;

    let app = create_router(orchestrator, Some(db_pool), &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Running imports are not awaited; the next start fails them
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
