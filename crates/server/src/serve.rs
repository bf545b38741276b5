//! HTTP serving with orchestrator-aware graceful shutdown.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use batchgate_core::BatchOrchestrator;

/// Serve `app` until `signal` completes.
///
/// The orchestrator is stopped as soon as the signal fires, before axum
/// drains open connections. Sync callers still waiting on a batch get
/// `abandoned` and their connections close instead of holding the drain
/// open until their request timeout.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    orchestrator: Arc<BatchOrchestrator>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutdown signal received, stopping orchestrator");
            orchestrator.stop().await;
            info!("Orchestrator stopped, draining connections");
        })
        .await
}
