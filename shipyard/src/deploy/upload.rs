//! Artifact upload

use std::sync::Mutex;

use futures::{stream, StreamExt, TryStreamExt};
use tracing::{info, warn};

use crate::deploy::publisher::LogPublisher;
use crate::errors::PipelineError;
use crate::filesys::dir::Dir;
use crate::models::deployment::Artifact;
use crate::storage::content::ContentStore;

/// Content type used when the extension is unknown
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Every file under the build output, with its content type
pub async fn collect_artifacts(
    deployment_id: &str,
    output_dir: &Dir,
) -> Result<Vec<Artifact>, PipelineError> {
    let files = output_dir.walk_files().await?;
    Ok(files
        .into_iter()
        .map(|(local_path, relative_path)| Artifact {
            deployment_id: deployment_id.to_string(),
            content_type: content_type_for(&relative_path),
            relative_path,
            local_path,
        })
        .collect())
}

pub fn content_type_for(path: &str) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

/// One deployment's upload, remembering which keys it started writing
pub struct ArtifactUpload {
    store: ContentStore,
    started: Mutex<Vec<String>>,
}

impl ArtifactUpload {
    pub fn new(store: ContentStore) -> Self {
        Self {
            store,
            started: Mutex::new(Vec::new()),
        }
    }

    /// Upload every artifact with at most `concurrency` in flight
    ///
    /// The first failure aborts the remaining uploads.
    pub async fn run(
        &self,
        artifacts: Vec<Artifact>,
        concurrency: usize,
        publisher: &LogPublisher,
    ) -> Result<usize, PipelineError> {
        let total = artifacts.len();

        stream::iter(artifacts)
            .map(|artifact| self.upload_one(artifact, publisher))
            .buffer_unordered(concurrency.max(1))
            .try_collect::<Vec<()>>()
            .await?;

        info!("Uploaded {} artifacts", total);
        Ok(total)
    }

    async fn upload_one(
        &self,
        artifact: Artifact,
        publisher: &LogPublisher,
    ) -> Result<(), PipelineError> {
        let key = artifact.key();
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.clone());

        publisher
            .log(format!(
                "Uploading {} ({})",
                artifact.relative_path, artifact.content_type
            ))
            .await;

        self.store
            .put_file(&key, &artifact.local_path, &artifact.content_type)
            .await
            .map_err(|e| {
                PipelineError::UploadFailure(format!(
                    "Failed to upload {}: {}",
                    artifact.relative_path, e
                ))
            })?;

        publisher
            .log(format!("Uploaded {}", artifact.relative_path))
            .await;
        Ok(())
    }

    /// Best-effort delete of every key this upload started, returning how
    /// many were removed
    pub async fn rollback(&self, publisher: &LogPublisher) -> usize {
        let keys = std::mem::take(&mut *self.started.lock().unwrap_or_else(|e| e.into_inner()));
        if keys.is_empty() {
            return 0;
        }
        publisher
            .log(format!("Rolling back {} uploaded files", keys.len()))
            .await;

        let mut removed = 0;
        for key in keys {
            match self.store.delete(&key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Rollback failed to delete {}: {}", key, e),
            }
        }
        removed
    }
}
