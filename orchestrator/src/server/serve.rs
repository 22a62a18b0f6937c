//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::OrchestratorError;
use crate::server::handlers::{
    cancel_handler, clear_config_handler, compensate_handler, continue_handler,
    diagnostic_handler, export_logs_handler, get_config_handler, health_handler,
    inventory_handler, reset_handler, retry_handler, rollback_handler, save_config_handler,
    start_handler, status_handler, version_handler,
};
use crate::server::state::ServerState;
use crate::server::stream::playbook_stream_handler;

/// Routes of the local API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployment
        .route("/deployment", get(status_handler))
        .route("/deployment/start", post(start_handler))
        .route("/deployment/continue", post(continue_handler))
        .route("/deployment/retry", post(retry_handler))
        .route("/deployment/rollback", post(rollback_handler))
        .route("/deployment/cancel", post(cancel_handler))
        .route("/deployment/reset", post(reset_handler))
        .route("/deployment/logs", get(export_logs_handler))
        .route("/deployment/aux/diagnostic", post(diagnostic_handler))
        .route("/deployment/aux/compensate/{job_id}", post(compensate_handler))
        // Wizard state
        .route(
            "/config",
            get(get_config_handler)
                .post(save_config_handler)
                .delete(clear_config_handler),
        )
        .route("/inventory/{mode}", post(inventory_handler))
        // Streaming transport
        .route("/ws/playbook/{*job}", get(playbook_stream_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), OrchestratorError>>, OrchestratorError> {
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal.await;
                // close open streams
                shutdown.cancel();
            })
            .await
            .map_err(|e| OrchestratorError::ServerError(e.to_string()))
    });

    Ok(handle)
}
