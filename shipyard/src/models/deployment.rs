//! Deployment models

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Building,
    Uploading,
    Ready,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Uploading => "uploading",
            DeploymentStatus::Ready => "ready",
            DeploymentStatus::Failed => "failed",
        }
    }

    /// `ready` and `failed` are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Ready | DeploymentStatus::Failed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One build-and-publish attempt for a source repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Slug, the join key across bus topics, storage keys and router hosts
    pub id: String,

    pub source_url: String,

    pub status: DeploymentStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(id: impl Into<String>, source_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source_url: source_url.into(),
            status: DeploymentStatus::Queued,
            created_at: now,
            updated_at: now,
        }
    }

    /// Preview URL served by the content router
    pub fn preview_url(&self, router_host: &str) -> String {
        preview_url(&self.id, router_host)
    }
}

/// Derive the preview URL of a deployment; no allocation step involved
pub fn preview_url(deployment_id: &str, router_host: &str) -> String {
    format!("http://{}.{}", deployment_id, router_host)
}

/// A single line of deployment progress published on the log bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub deployment_id: String,

    /// Strictly increasing per deployment, starting at 1
    pub sequence: u64,

    /// Non-decreasing per publisher
    pub timestamp: DateTime<Utc>,

    pub message: String,

    /// Set when the line also records a status transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
}

/// One built file belonging to a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub deployment_id: String,

    /// Path relative to the build output directory, `/`-separated
    pub relative_path: String,

    pub content_type: String,

    /// Location on the executor's local disk
    pub local_path: PathBuf,
}

impl Artifact {
    /// Object key under the deployment's namespace
    pub fn key(&self) -> String {
        artifact_key(&self.deployment_id, &self.relative_path)
    }
}

/// Prefix under which every deployment namespace lives
pub const DEPLOYMENTS_PREFIX: &str = "deployments";

pub fn artifact_key(deployment_id: &str, relative_path: &str) -> String {
    format!(
        "{}/{}/{}",
        DEPLOYMENTS_PREFIX,
        deployment_id,
        relative_path.trim_start_matches('/')
    )
}
