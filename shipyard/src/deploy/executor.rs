//! Build executor: fetch, build, upload for one deployment

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::bus::LogBus;
use crate::deploy::build::{locate_output, run_step};
use crate::deploy::git::Fetcher;
use crate::deploy::publisher::LogPublisher;
use crate::deploy::upload::{collect_artifacts, ArtifactUpload};
use crate::errors::PipelineError;
use crate::filesys::dir::Dir;
use crate::models::deployment::DeploymentStatus;
use crate::storage::content::ContentStore;
use crate::storage::layout::WorkspaceLayout;
use crate::storage::settings::{BuildSettings, Settings};

/// Executor tuning
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub layout: WorkspaceLayout,
    pub build: BuildSettings,
    /// Wall-clock limit applied to each step separately
    pub step_timeout: Duration,
    pub upload_concurrency: usize,
    /// Delete already-uploaded keys when the upload fails
    pub upload_rollback: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ExecutorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            layout: WorkspaceLayout::new(settings.workspace_root.clone()),
            build: settings.build.clone(),
            step_timeout: settings.step_timeout,
            upload_concurrency: settings.upload_concurrency,
            upload_rollback: settings.upload_rollback,
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorReport {
    pub deployment_id: String,
    pub files_uploaded: usize,
}

/// Runs one deployment to completion; holds no per-deployment state, so one
/// instance may serve any number of concurrent runs
pub struct BuildExecutor {
    options: ExecutorOptions,
    bus: Arc<dyn LogBus>,
    store: ContentStore,
    fetcher: Arc<dyn Fetcher>,
}

impl BuildExecutor {
    pub fn new(
        options: ExecutorOptions,
        bus: Arc<dyn LogBus>,
        store: ContentStore,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            options,
            bus,
            store,
            fetcher,
        }
    }

    /// Run the deployment; every fatal error ends in exactly one failure line
    pub async fn run(
        &self,
        deployment_id: &str,
        source_url: &str,
    ) -> Result<ExecutorReport, PipelineError> {
        info!("Executor starting for {} from {}", deployment_id, source_url);

        let publisher = LogPublisher::new(self.bus.clone(), deployment_id);
        let run_dir = self.options.layout.run_dir(deployment_id);

        let result = self.run_steps(&publisher, &run_dir, source_url).await;

        if let Err(e) = run_dir.delete().await {
            warn!("Failed to remove workspace {}: {}", run_dir.path().display(), e);
        }

        match result {
            Ok(files_uploaded) => {
                publisher
                    .status(
                        DeploymentStatus::Ready,
                        format!("Deployment complete: {} files uploaded", files_uploaded),
                    )
                    .await;
                info!("Deployment {} ready", deployment_id);
                Ok(ExecutorReport {
                    deployment_id: deployment_id.to_string(),
                    files_uploaded,
                })
            }
            Err(e) => {
                publisher
                    .status(DeploymentStatus::Failed, format!("ERROR: {}", e))
                    .await;
                error!("Deployment {} failed: {}", deployment_id, e);
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        publisher: &LogPublisher,
        run_dir: &Dir,
        source_url: &str,
    ) -> Result<usize, PipelineError> {
        let limit = self.options.step_timeout;
        let build = &self.options.build;
        let source_dir = WorkspaceLayout::source_dir(run_dir);

        // 1. Fetch
        publisher
            .status(DeploymentStatus::Building, format!("Cloning {}", source_url))
            .await;
        run_dir.create().await?;
        with_timeout(
            "fetch",
            limit,
            self.fetcher.fetch(source_url, source_dir.path(), publisher),
        )
        .await?;
        publisher.log("Repository cloned").await;

        // 2. Build
        with_timeout(
            "install",
            limit,
            run_step("install", &build.install_cmd, &source_dir, publisher),
        )
        .await?;
        with_timeout(
            "build",
            limit,
            run_step("build", &build.build_cmd, &source_dir, publisher),
        )
        .await?;
        publisher.log("Build finished").await;

        // 3. Locate output
        let output_dir = locate_output(&source_dir, &build.output_dir).await?;
        let artifacts = collect_artifacts(publisher.deployment_id(), &output_dir).await?;

        // 4. Upload
        publisher
            .status(
                DeploymentStatus::Uploading,
                format!("Uploading {} files", artifacts.len()),
            )
            .await;
        let upload = ArtifactUpload::new(self.store.clone());
        let uploaded = with_timeout(
            "upload",
            limit,
            upload.run(artifacts, self.options.upload_concurrency, publisher),
        )
        .await;

        match uploaded {
            Ok(count) => Ok(count),
            Err(e) => {
                if self.options.upload_rollback {
                    let removed = upload.rollback(publisher).await;
                    info!("Rolled back {} uploaded files", removed);
                }
                Err(e)
            }
        }
    }
}

async fn with_timeout<T, F>(step: &str, limit: Duration, future: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            step: step.to_string(),
            secs: limit.as_secs(),
        }),
    }
}
