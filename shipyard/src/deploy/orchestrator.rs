//! Deployment orchestrator: intake, id assignment, executor handoff

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::deployments::DeploymentRegistry;
use crate::deploy::slug::{generate_slug, validate_slug};
use crate::deploy::source::SourceRef;
use crate::deploy::spawner::{ExecutorExit, ExecutorHandle, ExecutorSpawner};
use crate::errors::PipelineError;
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::storage::settings::Settings;

/// Attempts at finding an unused generated slug
const MAX_SLUG_ATTEMPTS: usize = 16;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Repository hosts accepted in `gitURL`; empty accepts any host
    pub accepted_source_hosts: Vec<String>,
    pub router_host: String,
    /// Claim ids atomically before spawning
    pub reserve_slugs: bool,
}

impl OrchestratorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            accepted_source_hosts: settings.accepted_source_hosts.clone(),
            router_host: settings.router_host.clone(),
            reserve_slugs: settings.reserve_slugs,
        }
    }
}

/// Result of a deployment request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedDeployment {
    pub deployment_id: String,
    pub preview_url: String,
    pub status: DeploymentStatus,
}

pub struct Orchestrator {
    options: OrchestratorOptions,
    registry: Arc<DeploymentRegistry>,
    spawner: Arc<dyn ExecutorSpawner>,
}

impl Orchestrator {
    pub fn new(
        options: OrchestratorOptions,
        registry: Arc<DeploymentRegistry>,
        spawner: Arc<dyn ExecutorSpawner>,
    ) -> Self {
        Self {
            options,
            registry,
            spawner,
        }
    }

    pub fn registry(&self) -> &Arc<DeploymentRegistry> {
        &self.registry
    }

    pub fn router_host(&self) -> &str {
        &self.options.router_host
    }

    /// Validate, assign an id, start an executor and return without waiting
    /// for the build
    pub async fn create_deployment(
        &self,
        source_url: &str,
        slug: Option<&str>,
    ) -> Result<CreatedDeployment, PipelineError> {
        let source = SourceRef::parse(source_url, &self.options.accepted_source_hosts)?;
        let source_url = source.to_string();

        let deployment = match slug {
            Some(slug) => {
                validate_slug(slug)?;
                let deployment = Deployment::new(slug, source_url.clone());
                if self.options.reserve_slugs {
                    self.registry.reserve(deployment.clone())?;
                } else {
                    self.registry.upsert(deployment.clone());
                }
                deployment
            }
            None => self.claim_generated(&source_url)?,
        };
        let deployment_id = deployment.id.clone();

        let handle = match self.spawner.spawn(&deployment_id, &source_url).await {
            Ok(handle) => handle,
            Err(e) => {
                self.registry.remove(&deployment_id);
                return Err(e);
            }
        };
        tokio::spawn(supervise(self.registry.clone(), handle));

        info!("Deployment {} queued for {}", deployment_id, source_url);
        Ok(CreatedDeployment {
            preview_url: deployment.preview_url(&self.options.router_host),
            deployment_id,
            status: DeploymentStatus::Queued,
        })
    }

    fn claim_generated(&self, source_url: &str) -> Result<Deployment, PipelineError> {
        for _ in 0..MAX_SLUG_ATTEMPTS {
            let deployment = Deployment::new(generate_slug(), source_url);
            match self.registry.reserve(deployment.clone()) {
                Ok(()) => return Ok(deployment),
                Err(PipelineError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PipelineError::Internal(
            "no unused deployment id could be generated".to_string(),
        ))
    }
}

/// Mark the deployment failed if its executor died without reporting a
/// terminal status
async fn supervise(registry: Arc<DeploymentRegistry>, handle: ExecutorHandle) {
    let deployment_id = handle.deployment_id().to_string();
    let ExecutorExit::Failed(reason) = handle.wait().await else {
        info!("Executor for {} finished", deployment_id);
        return;
    };
    if registry.fail_if_active(&deployment_id, &reason) {
        warn!(
            "Executor for {} exited without a final status: {}",
            deployment_id, reason
        );
    }
}
