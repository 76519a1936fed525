//! Shared fixtures

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use shipyard::cache::deployments::DeploymentRegistry;
use shipyard::deploy::orchestrator::{Orchestrator, OrchestratorOptions};
use shipyard::deploy::spawner::{ExecutorExit, ExecutorHandle, ExecutorSpawner};
use shipyard::errors::PipelineError;

/// Spawner that records requests and finishes each "executor" with a fixed exit
pub struct FakeSpawner {
    pub exit: ExecutorExit,
    pub fail_spawn: bool,
    pub spawned: Mutex<Vec<(String, String)>>,
}

impl FakeSpawner {
    pub fn succeeding() -> Self {
        Self::with_exit(ExecutorExit::Success)
    }

    pub fn with_exit(exit: ExecutorExit) -> Self {
        Self {
            exit,
            fail_spawn: false,
            spawned: Mutex::new(Vec::new()),
        }
    }

    pub fn spawned(&self) -> Vec<(String, String)> {
        self.spawned.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutorSpawner for FakeSpawner {
    async fn spawn(
        &self,
        deployment_id: &str,
        source_url: &str,
    ) -> Result<ExecutorHandle, PipelineError> {
        if self.fail_spawn {
            return Err(PipelineError::SpawnError("no capacity".to_string()));
        }
        self.spawned
            .lock()
            .unwrap()
            .push((deployment_id.to_string(), source_url.to_string()));
        let exit = self.exit.clone();
        Ok(ExecutorHandle::new(
            deployment_id,
            tokio::spawn(async move { exit }),
        ))
    }
}

pub fn orchestrator_options() -> OrchestratorOptions {
    OrchestratorOptions {
        accepted_source_hosts: vec!["github.com".to_string()],
        router_host: "localhost:8000".to_string(),
        reserve_slugs: true,
    }
}

pub fn orchestrator(spawner: Arc<FakeSpawner>) -> Orchestrator {
    Orchestrator::new(
        orchestrator_options(),
        Arc::new(DeploymentRegistry::new(100)),
        spawner,
    )
}
