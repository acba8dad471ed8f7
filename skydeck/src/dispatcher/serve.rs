//! Dispatcher HTTP server

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
use crate::dispatcher::handlers::{create_deployment_handler, health_handler};
use crate::dispatcher::state::DispatcherState;
use crate::errors::PlatformError;

pub fn build_router(state: Arc<DispatcherState>) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(health_handler))
        // Deployments
        .route("/api/deployments", post(create_deployment_handler))
        .route("/api/upload", post(create_deployment_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the dispatcher HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<DispatcherState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), PlatformError>>, PlatformError> {
    let app = build_router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting dispatcher on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| PlatformError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| PlatformError::ServerError(e.to_string()))
    });

    Ok(handle)
}
