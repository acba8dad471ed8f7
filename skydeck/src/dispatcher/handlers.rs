//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use openapi_server::models::{
    DeploymentData, DeploymentQueuedResponse, DeploymentRequest, ErrorResponse,
};
use tracing::{error, info, warn};

use crate::dispatcher::state::DispatcherState;
use crate::slug::Slug;
use crate::utils::health;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(health("dispatcher"))
}

fn reject(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse::new(message)))
}

/// Queue a deployment: pick the slug, launch the build, answer with the
/// preview URL
pub async fn create_deployment_handler(
    State(state): State<Arc<DispatcherState>>,
    body: Result<Json<DeploymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let Json(request) = body.map_err(|e| {
        warn!("Rejected deployment request: {}", e);
        reject(StatusCode::BAD_REQUEST, e.body_text())
    })?;

    let repository_url = request
        .repository_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "repositoryUrl is required"))?;

    let slug = match request.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(supplied) => Slug::parse(supplied).map_err(|e| {
            warn!("Rejected slug '{}': {}", supplied, e);
            reject(StatusCode::BAD_REQUEST, e.to_string())
        })?,
        None => Slug::generate(),
    };

    let launch = state.launch_request(repository_url, &slug);
    match state.runtime.launch(&launch).await {
        Ok(receipt) => {
            info!(
                "Queued deployment {} for {} (task {})",
                slug,
                repository_url,
                receipt.task_id.as_deref().unwrap_or("unknown")
            );
        }
        Err(e) => {
            error!("Failed to launch build for {}: {}", slug, e);
            return Err(reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to launch build task",
            ));
        }
    }

    let url = state.preview_url(&slug);
    Ok((
        StatusCode::ACCEPTED,
        Json(DeploymentQueuedResponse {
            status: "queued".to_string(),
            data: DeploymentData {
                slug: slug.to_string(),
                url,
            },
        }),
    ))
}
