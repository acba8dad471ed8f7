//! Source checkout

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::PlatformError;

/// How the sources ended up in the working directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkout {
    /// Freshly cloned
    Cloned,
    /// Directory already had content and was used as-is
    Existing,
}

/// Make sure `work_dir` holds the project sources, cloning `repo_url` into it
/// when it is missing or empty
pub async fn materialize(repo_url: &str, work_dir: &Path) -> Result<Checkout, PlatformError> {
    if !is_empty_dir(work_dir).await? {
        debug!("{} already has content, skipping clone", work_dir.display());
        return Ok(Checkout::Existing);
    }

    info!("Cloning {} into {}", repo_url, work_dir.display());
    let output = Command::new("git")
        .args(["clone", "--depth", "1", repo_url])
        .arg(work_dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| PlatformError::BuildError(format!("failed to run git clone: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PlatformError::BuildError(format!(
            "git clone failed: {}",
            stderr.trim()
        )));
    }

    info!("Cloned {}", repo_url);
    Ok(Checkout::Cloned)
}

/// Missing directories count as empty
async fn is_empty_dir(dir: &Path) -> Result<bool, PlatformError> {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => Ok(entries.next_entry().await?.is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}
