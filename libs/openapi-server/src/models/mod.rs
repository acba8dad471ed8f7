//! Platform API models

use serde::{Deserialize, Serialize};

/// Deployment request
///
/// `gitUrl` and `existingSlug` are the field names used by the first
/// version of the upload endpoint and are still accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    #[serde(default, alias = "gitUrl")]
    pub repository_url: Option<String>,
    #[serde(default, alias = "existingSlug")]
    pub slug: Option<String>,
}

/// Deployment accepted response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentQueuedResponse {
    pub status: String,
    pub data: DeploymentData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentData {
    pub slug: String,
    pub url: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: String,
}

/// Build progress event published on a deployment's log topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
}
