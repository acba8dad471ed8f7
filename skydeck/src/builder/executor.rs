//! Build executor

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::builder::command::{spawn_shell, OutputChunk};
use crate::builder::git::{materialize, Checkout};
use crate::builder::progress::ProgressPublisher;
use crate::builder::rewrite::rewrite_index;
use crate::builder::upload::{collect_files, upload_file};
use crate::errors::PlatformError;
use crate::slug::Slug;
use crate::store::{deployment_base_url, ObjectStore};

/// What to build and where to put it
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub repository_url: String,
    pub slug: Slug,
    pub work_dir: PathBuf,
    pub build_command: String,
    /// Relative to `work_dir`
    pub output_dir: PathBuf,
    pub store_public_url: String,
    pub abort_on_build_failure: bool,
}

impl BuildPlan {
    pub fn output_path(&self) -> PathBuf {
        self.work_dir.join(&self.output_dir)
    }
}

/// Outcome of a finished build
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub checkout: Checkout,
    /// `None` when the build process was killed by a signal
    pub exit_code: Option<i32>,
    /// Object keys written, in upload order
    pub uploaded: Vec<String>,
}

pub struct BuildExecutor {
    plan: BuildPlan,
    store: Arc<dyn ObjectStore>,
    progress: ProgressPublisher,
}

impl BuildExecutor {
    pub fn new(plan: BuildPlan, store: Arc<dyn ObjectStore>, broker: Arc<dyn Broker>) -> Self {
        let progress = ProgressPublisher::new(broker, plan.slug.as_str());
        Self {
            plan,
            store,
            progress,
        }
    }

    /// Run every step once. Failures are published on the log topic before
    /// they are returned.
    pub async fn run(&self) -> Result<BuildReport, PlatformError> {
        info!(
            "Building {} from {} in {}",
            self.plan.slug,
            self.plan.repository_url,
            self.plan.work_dir.display()
        );
        self.progress.publish("starting build process").await;

        let checkout = self
            .report(materialize(&self.plan.repository_url, &self.plan.work_dir).await)
            .await?;

        let exit_code = self.report(self.build().await).await?;
        if exit_code != Some(0) {
            warn!("Build command exited with {:?}", exit_code);
            if self.plan.abort_on_build_failure {
                let code = exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
                self.progress
                    .publish(format!("build process failed with exit code {}", code))
                    .await;
                return Err(PlatformError::BuildError(format!(
                    "build command exited with {}",
                    code
                )));
            }
        }
        self.progress.publish("build process completed successfully").await;

        let uploaded = self.report(self.upload().await).await?;
        self.progress.publish("completed uploading files").await;

        Ok(BuildReport {
            checkout,
            exit_code,
            uploaded,
        })
    }

    /// Run the build command, forwarding its output line by line
    async fn build(&self) -> Result<Option<i32>, PlatformError> {
        let mut output = spawn_shell(&self.plan.build_command, &self.plan.work_dir)?;
        while let Some(chunk) = output.next().await {
            match chunk {
                OutputChunk::Stdout(line) => self.progress.publish(line).await,
                OutputChunk::Stderr(line) => self.progress.error(line).await,
                OutputChunk::Exited(code) => return Ok(code),
            }
        }
        Err(PlatformError::BuildError(
            "build output ended without an exit status".to_string(),
        ))
    }

    async fn upload(&self) -> Result<Vec<String>, PlatformError> {
        let root = self.plan.output_path();
        let base_url = deployment_base_url(&self.plan.store_public_url, self.plan.slug.as_str());
        rewrite_index(&root, &base_url).await?;

        let files = collect_files(&root)?;
        info!("Uploading {} file(s) from {}", files.len(), root.display());

        let mut uploaded = Vec::with_capacity(files.len());
        for relative in files {
            let shown = relative.display().to_string();
            self.progress.publish(format!("uploading {}", shown)).await;
            let key = upload_file(
                self.store.as_ref(),
                self.plan.slug.as_str(),
                &root,
                &relative,
            )
            .await?;
            self.progress.publish(format!("uploaded {}", shown)).await;
            uploaded.push(key);
        }
        Ok(uploaded)
    }

    async fn report<T>(&self, result: Result<T, PlatformError>) -> Result<T, PlatformError> {
        if let Err(e) = &result {
            error!("Build of {} failed: {}", self.plan.slug, e);
            self.progress.error(e).await;
        }
        result
    }
}
