//! Broadcaster HTTP server

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{ws::rejection::WebSocketUpgradeRejection, State, WebSocketUpgrade},
    http::Method,
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::broadcaster::registry::SubscriptionRegistry;
use crate::broadcaster::socket::handle_socket;
use crate::errors::PlatformError;
use crate::utils::health;

/// Path WebSocket clients connect to
pub const SOCKET_PATH: &str = "/socket/ws";

/// Broadcaster state shared across handlers
pub struct BroadcasterState {
    pub registry: Arc<SubscriptionRegistry>,
}

/// Upgrade WebSocket requests, answer anything else with the liveness body
pub async fn socket_handler(
    State(state): State<Arc<BroadcasterState>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => {
            let registry = state.registry.clone();
            ws.on_upgrade(move |socket| handle_socket(socket, registry))
        }
        Err(_) => health_handler().await.into_response(),
    }
}

pub async fn health_handler() -> impl IntoResponse {
    Json(health("broadcaster"))
}

pub fn build_router(state: Arc<BroadcasterState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route(SOCKET_PATH, any(socket_handler))
        .fallback(health_handler)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the broadcaster HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<BroadcasterState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), PlatformError>>, PlatformError> {
    let app = build_router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting broadcaster on {}", addr);

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
