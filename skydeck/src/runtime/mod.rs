//! Container runtime access
//!
//! The platform only ever asks a runtime to start one short-lived build
//! container; it never tracks or stops what it launched.

pub mod docker;
pub mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::errors::PlatformError;

/// Where a build container is attached on the network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkPlacement {
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub assign_public_ip: bool,
}

/// Everything a runtime needs to start a build container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub image: String,
    pub placement: NetworkPlacement,
    pub environment: BTreeMap<String, String>,
}

/// Acknowledgement that the runtime accepted a launch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchReceipt {
    /// Runtime specific identifier of the started task, when reported
    pub task_id: Option<String>,
}

/// Launches isolated build containers
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a container and return once the runtime has accepted it
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchReceipt, PlatformError>;
}
