//! Content store: the object store deployments are uploaded into
//!
//! Keys are `deployments/{deploymentId}/{relativePath}`; each object carries
//! its content type so the store serves it back with the right header.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::errors::PipelineError;

/// S3-compatible bucket (S3, R2, MinIO) the content store lives in
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: SecretString,
}

/// An object read back from the store
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Thin wrapper over an [`ObjectStore`] with content-type aware writes
#[derive(Clone)]
pub struct ContentStore {
    store: Arc<dyn ObjectStore>,
}

impl ContentStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, PipelineError> {
        use object_store::aws::AmazonS3Builder;

        let store = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(config.secret_key.expose_secret())
            .with_allow_http(config.endpoint.starts_with("http://"))
            .build()?;

        info!(endpoint = %config.endpoint, bucket = %config.bucket, "content store configured");
        Ok(Self::new(Arc::new(store)))
    }

    /// Write `bytes` under `key` with the given content type
    pub async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), PipelineError> {
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        let location = object_path(key)
            .map_err(|e| PipelineError::UploadFailure(format!("invalid key {key}: {e}")))?;
        let size = bytes.len();
        self.store
            .put_opts(&location, PutPayload::from(bytes), options)
            .await?;
        debug!(key = %key, size, content_type = %content_type, "object stored");
        Ok(())
    }

    /// Upload a local file
    pub async fn put_file(
        &self,
        key: &str,
        local_path: &Path,
        content_type: &str,
    ) -> Result<(), PipelineError> {
        let data = tokio::fs::read(local_path).await?;
        self.put(key, Bytes::from(data), content_type).await
    }

    pub async fn get(&self, key: &str) -> Result<StoredObject, PipelineError> {
        let Ok(location) = object_path(key) else {
            return Err(PipelineError::NotFound(key.to_string()));
        };
        let result = match self.store.get(&location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(PipelineError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let content_type = result
            .attributes
            .get(&Attribute::ContentType)
            .map(|value| value.to_string());
        let bytes = result.bytes().await?;
        Ok(StoredObject {
            bytes,
            content_type,
        })
    }

    /// Delete `key`; a missing key is not an error
    pub async fn delete(&self, key: &str) -> Result<(), PipelineError> {
        let Ok(location) = object_path(key) else {
            return Ok(());
        };
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every key under `prefix`
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, PipelineError> {
        let prefix = object_path(prefix.trim_end_matches('/'))
            .map_err(|e| PipelineError::StorageError(format!("invalid prefix {prefix}: {e}")))?;
        let mut keys: Vec<String> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        keys.sort();
        Ok(keys)
    }
}

// Keys are taken verbatim; `Path::from` would percent-encode characters
// such as `[` or `~` and the stored key would no longer match the file name
fn object_path(key: &str) -> Result<ObjectPath, object_store::path::Error> {
    ObjectPath::parse(key)
}
