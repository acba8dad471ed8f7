//! Error types for skydeck

use thiserror::Error;

/// Main error type for skydeck
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Broker error: {0}")]
    BrokerError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Build error: {0}")]
    BuildError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Proxy error: {0}")]
    ProxyError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for PlatformError {
    fn from(err: anyhow::Error) -> Self {
        PlatformError::Internal(err.to_string())
    }
}
