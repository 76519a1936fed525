//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::{AppOptions, ExecutorMode};
use crate::bus::{self, LogBus};
use crate::cache::deployments::DeploymentRegistry;
use crate::deploy::executor::{BuildExecutor, ExecutorOptions};
use crate::deploy::git::GitFetcher;
use crate::deploy::orchestrator::{Orchestrator, OrchestratorOptions};
use crate::deploy::spawner::{ExecutorSpawner, ProcessSpawner, TaskSpawner};
use crate::errors::PipelineError;
use crate::gateway::Rooms;
use crate::router::RouterState;
use crate::storage::content::ContentStore;
use crate::storage::settings::Settings;

/// Shared components of a long-running process; each is present only when
/// the role needs it
pub struct AppState {
    /// Process-wide log bus
    pub bus: Option<Arc<dyn LogBus>>,

    /// Deployment intake
    pub orchestrator: Option<Arc<Orchestrator>>,

    /// Gateway room table
    pub rooms: Option<Arc<Rooms>>,

    /// Content router
    pub router: Option<Arc<RouterState>>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, PipelineError> {
        info!("Initializing application state for role {}...", options.role);
        let settings = &options.settings;
        let role = options.role;

        let bus = if role.runs_api() || role.runs_gateway() {
            Some(bus::connect(&settings.bus_address()?, role.as_str()).await?)
        } else {
            None
        };

        let orchestrator = match (&bus, role.runs_api()) {
            (Some(bus), true) => {
                let registry = Arc::new(DeploymentRegistry::new(options.registry_capacity));
                let spawner = init_spawner(settings, bus.clone())?;
                Some(Arc::new(Orchestrator::new(
                    OrchestratorOptions::from_settings(settings),
                    registry,
                    spawner,
                )))
            }
            _ => None,
        };

        let rooms = role.runs_gateway().then(|| {
            Arc::new(Rooms::new(
                settings.subscriber_queue_capacity,
                settings.log_replay_capacity,
            ))
        });

        let router = if role.runs_router() {
            Some(Arc::new(RouterState::new(settings.content_base_url()?)?))
        } else {
            None
        };

        Ok(Self {
            bus,
            orchestrator,
            rooms,
            router,
        })
    }

    /// Shutdown application state, draining the log bus
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        info!("Shutting down application state...");
        if let Some(bus) = &self.bus {
            bus.shutdown().await?;
        }
        Ok(())
    }
}

fn init_spawner(
    settings: &Settings,
    bus: Arc<dyn LogBus>,
) -> Result<Arc<dyn ExecutorSpawner>, PipelineError> {
    match settings.executor_mode {
        ExecutorMode::Process => Ok(Arc::new(ProcessSpawner::current_exe()?)),
        ExecutorMode::Task => Ok(Arc::new(TaskSpawner::new(Arc::new(init_executor(
            settings, bus,
        )?)))),
    }
}

/// Build executor wired to the configured content store
pub fn init_executor(
    settings: &Settings,
    bus: Arc<dyn LogBus>,
) -> Result<BuildExecutor, PipelineError> {
    let store = ContentStore::from_config(&settings.store_config()?)?;
    Ok(BuildExecutor::new(
        ExecutorOptions::from_settings(settings),
        bus,
        store,
        Arc::new(GitFetcher),
    ))
}
