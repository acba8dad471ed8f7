//! Docker CLI runtime

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::PlatformError;
use crate::runtime::{ContainerRuntime, LaunchReceipt, LaunchRequest};

/// Starts detached, self-removing containers with the local docker CLI.
///
/// The first configured subnet is used as the docker network name. Security
/// groups have no docker equivalent and are ignored.
pub struct DockerRuntime {
    binary: String,
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments for `docker run`. Values are passed through the child's
    /// environment so credentials never show up in the process list.
    pub fn run_args(request: &LaunchRequest) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string(), "--rm".to_string()];

        if let Some(network) = request.placement.subnets.first() {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        for name in request.environment.keys() {
            args.push("-e".to_string());
            args.push(name.clone());
        }

        args.push(request.image.clone());
        args
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchReceipt, PlatformError> {
        info!("Launching build container from image: {}", request.image);

        let args = Self::run_args(request);
        debug!("{} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .envs(&request.environment)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PlatformError::RuntimeError(format!("Failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlatformError::RuntimeError(format!(
                "docker run failed for {}: {}",
                request.image,
                stderr.trim()
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Build container started: {}", container_id);

        Ok(LaunchReceipt {
            task_id: (!container_id.is_empty()).then_some(container_id),
        })
    }
}
