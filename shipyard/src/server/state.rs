//! Server state

use std::sync::Arc;

use crate::cache::deployments::DeploymentRegistry;
use crate::deploy::orchestrator::Orchestrator;

/// Orchestrator API state shared across handlers
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn registry(&self) -> &DeploymentRegistry {
        self.orchestrator.registry()
    }
}
