//! Dispatcher state

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::app::options::keys;
use crate::runtime::{ContainerRuntime, LaunchRequest, NetworkPlacement};
use crate::slug::Slug;

/// Dispatcher state shared across handlers
pub struct DispatcherState {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub platform_domain: String,
    pub build_image: String,
    pub placement: NetworkPlacement,
    /// Store and broker settings every build container receives
    pub base_environment: BTreeMap<String, String>,
}

impl DispatcherState {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        platform_domain: String,
        build_image: String,
        placement: NetworkPlacement,
        base_environment: BTreeMap<String, String>,
    ) -> Self {
        Self {
            runtime,
            platform_domain,
            build_image,
            placement,
            base_environment,
        }
    }

    /// Launch request for building `repository_url` as `slug`
    pub fn launch_request(&self, repository_url: &str, slug: &Slug) -> LaunchRequest {
        let mut environment = self.base_environment.clone();
        environment.insert(
            keys::GIT_REPOSITORY_URL.to_string(),
            repository_url.to_string(),
        );
        environment.insert(keys::PROJECT_ID.to_string(), slug.to_string());
        LaunchRequest {
            image: self.build_image.clone(),
            placement: self.placement.clone(),
            environment,
        }
    }

    /// Preview URL of a deployment
    pub fn preview_url(&self, slug: &Slug) -> String {
        format!("http://{}.{}", slug, self.platform_domain)
    }
}
