//! Install and build steps

use tracing::info;

use crate::deploy::command::{run_streamed, shell};
use crate::deploy::publisher::LogPublisher;
use crate::errors::PipelineError;
use crate::filesys::dir::Dir;

/// Run one build-phase shell command inside the source directory
///
/// An empty command is skipped.
pub async fn run_step(
    name: &str,
    script: &str,
    source_dir: &Dir,
    publisher: &LogPublisher,
) -> Result<(), PipelineError> {
    if script.trim().is_empty() {
        return Ok(());
    }
    info!("Running {} command: {}", name, script);
    publisher.log(format!("Running {}: {}", name, script)).await;

    let status = run_streamed(shell(script), source_dir.path(), publisher)
        .await
        .map_err(|e| PipelineError::BuildFailure(format!("Failed to run {} command: {}", name, e)))?;

    if !status.success() {
        return Err(PipelineError::BuildFailure(format!(
            "{} command `{}` exited with {}",
            name, script, status
        )));
    }
    Ok(())
}

/// The directory the build must have produced
pub async fn locate_output(source_dir: &Dir, output_dir: &str) -> Result<Dir, PipelineError> {
    let output = source_dir.subdir(output_dir);
    if !output.exists().await {
        return Err(PipelineError::BuildOutputMissing(format!(
            "build produced no `{}` directory",
            output_dir
        )));
    }
    Ok(output)
}
