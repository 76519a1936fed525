//! Executor spawning
//!
//! The orchestrator hands each deployment to an [`ExecutorSpawner`] and gets
//! back a handle whose completion can be observed without blocking intake.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::deploy::executor::BuildExecutor;
use crate::errors::PipelineError;
use crate::storage::settings::{GIT_REPOSITORY_URL, PROJECT_ID};

/// How an executor run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorExit {
    Success,
    Failed(String),
}

impl ExecutorExit {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutorExit::Success)
    }
}

/// Observable completion of one executor
pub struct ExecutorHandle {
    deployment_id: String,
    join: JoinHandle<ExecutorExit>,
}

impl ExecutorHandle {
    pub fn new(deployment_id: impl Into<String>, join: JoinHandle<ExecutorExit>) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            join,
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Wait for the executor to finish
    pub async fn wait(self) -> ExecutorExit {
        match self.join.await {
            Ok(exit) => exit,
            Err(e) => ExecutorExit::Failed(format!("executor task aborted: {}", e)),
        }
    }
}

/// Starts isolated executors
#[async_trait]
pub trait ExecutorSpawner: Send + Sync {
    async fn spawn(
        &self,
        deployment_id: &str,
        source_url: &str,
    ) -> Result<ExecutorHandle, PipelineError>;
}

/// Runs each executor as a child process of this binary
///
/// The child inherits the environment (bus and storage settings) and receives
/// `PROJECT_ID` and `GIT_REPOSITORY_URL` on top.
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    /// Re-execute the current binary with `--role=executor`
    pub fn current_exe() -> Result<Self, PipelineError> {
        let program = std::env::current_exe()
            .map_err(|e| PipelineError::SpawnError(format!("cannot locate own binary: {}", e)))?;
        Ok(Self::new(program, vec!["--role=executor".to_string()]))
    }

    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl ExecutorSpawner for ProcessSpawner {
    async fn spawn(
        &self,
        deployment_id: &str,
        source_url: &str,
    ) -> Result<ExecutorHandle, PipelineError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(PROJECT_ID, deployment_id)
            .env(GIT_REPOSITORY_URL, source_url)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                PipelineError::SpawnError(format!(
                    "Failed to start executor {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        info!(
            "Spawned executor process {:?} for {}",
            child.id(),
            deployment_id
        );

        let id = deployment_id.to_string();
        let join = tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => ExecutorExit::Success,
                Ok(status) => ExecutorExit::Failed(format!("executor exited with {}", status)),
                Err(e) => {
                    error!("Failed to wait for executor of {}: {}", id, e);
                    ExecutorExit::Failed(e.to_string())
                }
            }
        });

        Ok(ExecutorHandle::new(deployment_id, join))
    }
}

/// Runs each executor as a task in this process
pub struct TaskSpawner {
    executor: Arc<BuildExecutor>,
}

impl TaskSpawner {
    pub fn new(executor: Arc<BuildExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ExecutorSpawner for TaskSpawner {
    async fn spawn(
        &self,
        deployment_id: &str,
        source_url: &str,
    ) -> Result<ExecutorHandle, PipelineError> {
        let executor = self.executor.clone();
        let id = deployment_id.to_string();
        let url = source_url.to_string();

        let join = tokio::spawn(async move {
            match executor.run(&id, &url).await {
                Ok(_) => ExecutorExit::Success,
                Err(e) => ExecutorExit::Failed(e.to_string()),
            }
        });

        info!("Spawned executor task for {}", deployment_id);
        Ok(ExecutorHandle::new(deployment_id, join))
    }
}
