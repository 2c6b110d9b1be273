use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use turnstile_core::{
    config_path_from_env, load_config, validate_config, AdmissionEngine, ChannelBackend, MemoryRequestChannel,
    RequestChannel, SqliteRequestChannel, SqliteStore, WorkerPool,
};
use turnstile_server::{api::create_router, state::AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = config_path_from_env();

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    // Create SQLite store (events, capacity, tickets)
    let store = Arc::new(
        SqliteStore::new(&config.database.path, config.database.busy_timeout())
            .context("Failed to open ticket store")?,
    );
    info!("Ticket store initialized");

    // Create request channel
    let channel: Arc<dyn RequestChannel> = match config.channel.backend {
        ChannelBackend::Sqlite => {
            info!(
                "Using durable request queue (lease: {}s)",
                config.channel.lease_secs
            );
            Arc::new(
                SqliteRequestChannel::new(
                    &config.database.path,
                    config.channel.sqlite_options(&config.database),
                )
                .context("Failed to open request queue")?,
            )
        }
        ChannelBackend::Memory => {
            warn!("Using in-memory request queue; queued bookings are lost on restart");
            Arc::new(MemoryRequestChannel::new())
        }
    };

    // Create worker pool if enabled
    let workers = if config.workers.enabled {
        let pool = WorkerPool::new(
            config.workers.clone(),
            Arc::clone(&channel),
            AdmissionEngine::from_store(Arc::clone(&store)),
        )
        .with_error_backoff(config.channel.poll_interval());
        pool.start().context("Failed to start worker pool")?;
        info!("Worker pool started with {} workers", config.workers.count);
        Some(Arc::new(pool))
    } else {
        info!("Workers disabled in config; bookings will only be queued");
        None
    };

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        channel,
        workers.clone(),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop workers; an unsettled delivery goes back to the queue
    info!("Server shutting down...");
    if let Some(pool) = workers {
        info!("Stopping worker pool...");
        if let Err(e) = pool.stop().await {
            warn!("Worker pool did not stop cleanly: {}", e);
        }
        info!("Worker pool stopped");
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
