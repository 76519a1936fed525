//! Application configuration options

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::storage::settings::Settings;

/// Which services a process runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    Api,
    Gateway,
    Router,
    Executor,
    #[default]
    All,
}

impl Role {
    pub fn runs_api(&self) -> bool {
        matches!(self, Role::Api | Role::All)
    }

    pub fn runs_gateway(&self) -> bool {
        matches!(self, Role::Gateway | Role::All)
    }

    pub fn runs_router(&self) -> bool {
        matches!(self, Role::Router | Role::All)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Api => "api",
            Role::Gateway => "gateway",
            Role::Router => "router",
            Role::Executor => "executor",
            Role::All => "all",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "api" | "orchestrator" => Ok(Role::Api),
            "gateway" => Ok(Role::Gateway),
            "router" => Ok(Role::Router),
            "executor" => Ok(Role::Executor),
            "all" => Ok(Role::All),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// How the orchestrator isolates executors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutorMode {
    /// Child process of the current binary
    #[default]
    Process,
    /// Task inside the orchestrator's runtime
    Task,
}

impl FromStr for ExecutorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "process" => Ok(ExecutorMode::Process),
            "task" => Ok(ExecutorMode::Task),
            _ => Err(format!("Invalid executor mode: {}", s)),
        }
    }
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub role: Role,

    pub lifecycle: LifecycleOptions,

    pub settings: Settings,

    /// Maximum deployment records kept by the registry
    pub registry_capacity: usize,
}

impl AppOptions {
    pub fn new(role: Role, settings: Settings) -> Self {
        Self {
            role,
            lifecycle: LifecycleOptions::default(),
            settings,
            registry_capacity: 1000,
        }
    }
}

/// Lifecycle options for long-running roles
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
