//! Output directory upload

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::errors::PlatformError;
use crate::store::{content_type_for, object_key, ObjectStore};

/// Regular files under `root`, relative to it, in a stable order.
/// Directories and symlinks are skipped.
pub fn collect_files(root: &Path) -> Result<Vec<PathBuf>, PlatformError> {
    if !root.is_dir() {
        return Err(PlatformError::BuildError(format!(
            "output directory {} does not exist",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| PlatformError::BuildError(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| PlatformError::Internal(e.to_string()))?;
        files.push(relative.to_path_buf());
    }
    Ok(files)
}

/// Upload one file and return the key it was stored under
pub async fn upload_file(
    store: &dyn ObjectStore,
    slug: &str,
    root: &Path,
    relative: &Path,
) -> Result<String, PlatformError> {
    let key = object_key(slug, relative);
    let content_type = content_type_for(relative);
    let body = tokio::fs::read(root.join(relative)).await?;
    debug!("PUT {} ({}, {} bytes)", key, content_type, body.len());
    store.put(&key, body, &content_type).await?;
    Ok(key)
}
