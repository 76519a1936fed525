//! Source fetching

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::deploy::command::run_streamed;
use crate::deploy::publisher::LogPublisher;
use crate::errors::PipelineError;

/// Materializes a source reference into a local directory
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `source_url` into `dest`, which must not exist yet
    async fn fetch(
        &self,
        source_url: &str,
        dest: &Path,
        publisher: &LogPublisher,
    ) -> Result<(), PipelineError>;
}

/// Shallow `git clone` of the default branch
#[derive(Debug, Clone, Default)]
pub struct GitFetcher;

#[async_trait]
impl Fetcher for GitFetcher {
    async fn fetch(
        &self,
        source_url: &str,
        dest: &Path,
        publisher: &LogPublisher,
    ) -> Result<(), PipelineError> {
        info!("Cloning repository {} to {}", source_url, dest.display());

        let parent = dest
            .parent()
            .ok_or_else(|| PipelineError::FetchFailure(format!("invalid workspace {}", dest.display())))?;
        tokio::fs::create_dir_all(parent).await?;

        let mut command = Command::new("git");
        command
            .args(["clone", "--depth", "1", "--quiet", source_url])
            .arg(dest)
            // Fail instead of prompting for credentials on private or missing repos
            .env("GIT_TERMINAL_PROMPT", "0");

        let status = run_streamed(command, parent, publisher)
            .await
            .map_err(|e| PipelineError::FetchFailure(format!("Failed to run git clone: {}", e)))?;

        if !status.success() {
            return Err(PipelineError::FetchFailure(format!(
                "git clone exited with {}",
                status
            )));
        }

        info!("Successfully cloned {}", source_url);
        Ok(())
    }
}
