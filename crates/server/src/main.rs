use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batchgate_core::{
    load_config, load_config_from_env, validate_config, BatchOrchestrator, BatchProvider,
    BatchStore, OpenAiProvider, ProviderBatchProcessor, ServingMode, SqliteStore,
    StoreBackedCache,
};
use batchgate_server::{api::create_router, serve::serve, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

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

    info!("batchgate {} starting", VERSION);

    // Determine config path
    let config_path = std::env::var("BATCHGATE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    let config = if config_path.exists() {
        info!("Loading configuration from {:?}", config_path);
        load_config(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        info!(
            "No config file at {:?}, using environment variables only",
            config_path
        );
        load_config_from_env().context("Failed to load config from environment")?
    };

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Serving mode: {}", config.serving.mode);
    info!("Database path: {:?}", config.database.path);

    // Create SQLite store (response cache + batch status log)
    let store: Arc<dyn BatchStore> = Arc::new(
        SqliteStore::new(&config.database.path).context("Failed to create batch store")?,
    );
    info!("Batch store initialized");

    // Create provider client
    let provider: Arc<dyn BatchProvider> = Arc::new(
        OpenAiProvider::new(config.provider.clone()).context("Failed to create provider client")?,
    );
    info!("Using batch provider at {}", config.provider.api_base);

    let processor = Arc::new(ProviderBatchProcessor::new(
        Arc::clone(&provider),
        Arc::clone(&store),
        config.batching.clone(),
        config.provider.endpoint.clone(),
    ));
    let cache = Arc::new(StoreBackedCache::new(Arc::clone(&store)));

    // Cache-only deployments may run without credentials; recovery needs them.
    let mut recovery = config.recovery.clone();
    if config.serving.mode == ServingMode::CacheOnly
        && config.provider.api_key.is_empty()
        && recovery.on_startup
    {
        warn!("No provider API key configured, skipping dangling batch recovery");
        recovery.on_startup = false;
    }

    let orchestrator = Arc::new(BatchOrchestrator::new(
        processor,
        cache,
        Arc::clone(&store),
        config.serving.mode,
        config.batching.clone(),
        recovery,
    ));
    orchestrator.start();
    info!("Batch orchestrator started");

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&orchestrator),
        store,
        provider,
    ));

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    serve(listener, app, orchestrator, shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");

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
