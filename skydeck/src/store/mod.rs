//! Artifact store access
//!
//! Objects are written once per key and read back over plain HTTP GET by the
//! traffic router. Every deployment owns the key prefix
//! `__outputs/<slug>/`.

pub mod http;
pub mod memory;

use std::path::{Component, Path};

use async_trait::async_trait;

use crate::errors::PlatformError;

/// Key prefix under which build outputs are stored
pub const OUTPUTS_PREFIX: &str = "__outputs";

/// Object storage write access
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, replacing any previous object
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), PlatformError>;
}

/// Object key for a file relative to a build's output root
pub fn object_key(slug: &str, relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    format!("{}/{}/{}", OUTPUTS_PREFIX, slug, parts.join("/"))
}

/// Public base URL of a deployment's artifacts, without a trailing slash
pub fn deployment_base_url(store_public_url: &str, slug: &str) -> String {
    format!(
        "{}/{}/{}",
        store_public_url.trim_end_matches('/'),
        OUTPUTS_PREFIX,
        slug
    )
}

/// Content type for a file, guessed from its extension
pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
