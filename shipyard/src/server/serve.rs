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

use crate::errors::PipelineError;
use crate::gateway::socket::ws_handler;
use crate::gateway::Rooms;
use crate::server::handlers::{
    create_project_handler, get_project_handler, health_handler, version_handler,
};
use crate::server::state::ApiState;

/// Orchestrator intake API
pub fn api_app(state: Arc<ApiState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route("/project", post(create_project_handler))
        .route("/project/{slug}", get(get_project_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Realtime fanout gateway
pub fn gateway_app(rooms: Arc<Rooms>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .with_state(rooms)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve `app` until `shutdown_signal` resolves
pub async fn serve(
    name: &str,
    addr: &str,
    app: Router,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), PipelineError>>, PipelineError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| PipelineError::ServerError(format!("{} cannot bind {}: {}", name, addr, e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| PipelineError::ServerError(e.to_string()))?;
    info!("Starting {} server on {}", name, local);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| PipelineError::ServerError(e.to_string()))
    });

    Ok(handle)
}
