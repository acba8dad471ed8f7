//! Task-launch API runtime

use async_trait::async_trait;
use openapi_client::models::{
    AssignPublicIp, ContainerOverride, KeyValuePair, NetworkConfiguration, RunTaskRequest,
    RunTaskResponse, TaskOverride, VpcConfiguration,
};
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, info};

use crate::errors::PlatformError;
use crate::runtime::{ContainerRuntime, LaunchReceipt, LaunchRequest};

/// Launches build tasks through a remote run-task endpoint. The image
/// reference of a [`LaunchRequest`] names the task definition to run.
pub struct HttpRuntime {
    client: Client,
    endpoint: String,
    cluster: String,
    container_name: String,
    token: Option<SecretString>,
}

impl HttpRuntime {
    pub fn new(
        endpoint: &str,
        cluster: String,
        container_name: String,
        token: Option<SecretString>,
    ) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            cluster,
            container_name,
            token,
        })
    }

    /// Build the run-task body for a launch
    pub fn run_task_request(&self, request: &LaunchRequest) -> RunTaskRequest {
        let assign_public_ip = if request.placement.assign_public_ip {
            AssignPublicIp::Enabled
        } else {
            AssignPublicIp::Disabled
        };

        RunTaskRequest {
            cluster: self.cluster.clone(),
            task_definition: request.image.clone(),
            launch_type: "FARGATE".to_string(),
            count: 1,
            network_configuration: NetworkConfiguration {
                awsvpc_configuration: VpcConfiguration {
                    subnets: request.placement.subnets.clone(),
                    security_groups: request.placement.security_groups.clone(),
                    assign_public_ip,
                },
            },
            overrides: TaskOverride {
                container_overrides: vec![ContainerOverride {
                    name: self.container_name.clone(),
                    environment: request
                        .environment
                        .iter()
                        .map(|(name, value)| KeyValuePair {
                            name: name.clone(),
                            value: value.clone(),
                        })
                        .collect(),
                }],
            },
        }
    }
}

#[async_trait]
impl ContainerRuntime for HttpRuntime {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchReceipt, PlatformError> {
        debug!("POST {} (run task)", self.endpoint);

        let mut http_request = self
            .client
            .post(&self.endpoint)
            .json(&self.run_task_request(request));

        if let Some(token) = &self.token {
            http_request = http_request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let response = http_request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Run task failed: {} - {}", status, body);
            return Err(PlatformError::RuntimeError(format!("{}: {}", status, body)));
        }

        let body: RunTaskResponse = response.json().await?;

        if !body.failures.is_empty() {
            let reasons: Vec<String> = body
                .failures
                .iter()
                .map(|f| {
                    format!(
                        "{} {}",
                        f.reason.as_deref().unwrap_or("unknown"),
                        f.detail.as_deref().unwrap_or("")
                    )
                    .trim()
                    .to_string()
                })
                .collect();
            return Err(PlatformError::RuntimeError(format!(
                "task was not placed: {}",
                reasons.join("; ")
            )));
        }

        let task_id = body.tasks.into_iter().find_map(|t| t.task_arn);
        info!("Build task accepted: {}", task_id.as_deref().unwrap_or("(no id)"));

        Ok(LaunchReceipt { task_id })
    }
}
