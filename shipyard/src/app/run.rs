//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{init_executor, AppState};
use crate::bus::{self, LogBus, Topics};
use crate::cache::deployments::DeploymentRegistry;
use crate::deploy::executor::ExecutorReport;
use crate::errors::PipelineError;
use crate::gateway::Rooms;
use crate::router::{self, RouterState};
use crate::server::serve::{api_app, gateway_app, serve};
use crate::server::state::ApiState;
use crate::storage::settings::Settings;
use crate::workers::{fanout, tracker};

/// Run the long-lived services of `options.role` until `shutdown_signal`
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PipelineError> {
    info!("Initializing shipyard ({})...", options.role);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start shipyard: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

/// Run a single build executor from the executor environment
pub async fn run_executor(settings: &Settings) -> Result<ExecutorReport, PipelineError> {
    let env = settings.executor_env()?;
    let bus = bus::connect(&settings.bus_address()?, "executor").await?;
    let executor = init_executor(settings, bus.clone())?;

    let result = executor.run(&env.project_id, &env.git_repository_url).await;

    // Publishes must reach the broker before the process exits
    if let Err(e) = bus.shutdown().await {
        error!("Failed to drain log bus: {}", e);
    }
    result
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), PipelineError> {
    let app_state = Arc::new(AppState::init(options).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    if let (Some(bus), Some(orchestrator)) = (&app_state.bus, &app_state.orchestrator) {
        init_tracker_worker(
            bus.as_ref(),
            orchestrator.registry().clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;

        let handle = serve(
            "api",
            &options.settings.api_addr,
            api_app(Arc::new(ApiState::new(orchestrator.clone()))),
            shutdown_future(shutdown_tx.subscribe()),
        )
        .await?;
        shutdown_manager.with_server_handle("api", handle);
    }

    if let (Some(bus), Some(rooms)) = (&app_state.bus, &app_state.rooms) {
        init_fanout_worker(
            bus.as_ref(),
            rooms.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;

        let handle = serve(
            "gateway",
            &options.settings.gateway_addr,
            gateway_app(rooms.clone()),
            shutdown_future(shutdown_tx.subscribe()),
        )
        .await?;
        shutdown_manager.with_server_handle("gateway", handle);
    }

    if let Some(router_state) = &app_state.router {
        init_router(
            &options.settings.router_addr,
            router_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(())
}

async fn init_tracker_worker(
    bus: &dyn LogBus,
    registry: Arc<DeploymentRegistry>,
    shutdown_manager: &mut ShutdownManager,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PipelineError> {
    info!("Initializing status tracker...");

    let subscription = bus.subscribe(Topics::ALL_LOGS).await?;
    let handle = tokio::spawn(async move {
        tracker::run(
            subscription,
            registry.as_ref(),
            Box::pin(shutdown_future(shutdown_rx)),
        )
        .await;
    });

    shutdown_manager.with_worker_handle("tracker", handle);
    Ok(())
}

async fn init_fanout_worker(
    bus: &dyn LogBus,
    rooms: Arc<Rooms>,
    shutdown_manager: &mut ShutdownManager,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PipelineError> {
    info!("Initializing fanout worker...");

    let subscription = bus.subscribe(Topics::ALL_LOGS).await?;
    let handle = tokio::spawn(async move {
        fanout::run(
            subscription,
            rooms.as_ref(),
            Box::pin(shutdown_future(shutdown_rx)),
        )
        .await;
    });

    shutdown_manager.with_worker_handle("fanout", handle);
    Ok(())
}

async fn init_router(
    addr: &str,
    state: Arc<RouterState>,
    shutdown_manager: &mut ShutdownManager,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PipelineError> {
    info!("Initializing content router...");

    let handle = serve("router", addr, router::app(state), shutdown_future(shutdown_rx)).await?;
    shutdown_manager.with_server_handle("router", handle);
    Ok(())
}

fn shutdown_future(mut shutdown_rx: broadcast::Receiver<()>) -> impl Future<Output = ()> + Send {
    async move {
        let _ = shutdown_rx.recv().await;
    }
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handles: Vec<(&'static str, JoinHandle<Result<(), PipelineError>>)>,
    worker_handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handles: Vec::new(),
            worker_handles: Vec::new(),
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), PipelineError> {
        if self.app_state.is_some() {
            return Err(PipelineError::ShutdownError(
                "app_state already set".to_string(),
            ));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        name: &'static str,
        handle: JoinHandle<Result<(), PipelineError>>,
    ) {
        self.server_handles.push((name, handle));
    }

    pub fn with_worker_handle(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.worker_handles.push((name, handle));
    }

    pub async fn shutdown(&mut self) -> Result<(), PipelineError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), PipelineError> {
        info!("Shutting down shipyard...");

        // 1. Servers stop accepting requests
        for (name, handle) in self.server_handles.drain(..) {
            info!("Waiting for {} server...", name);
            handle
                .await
                .map_err(|e| PipelineError::ShutdownError(e.to_string()))??;
        }

        // 2. Workers
        for (name, handle) in self.worker_handles.drain(..) {
            info!("Waiting for {} worker...", name);
            handle
                .await
                .map_err(|e| PipelineError::ShutdownError(e.to_string()))?;
        }

        // 3. App state, draining the bus last
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
