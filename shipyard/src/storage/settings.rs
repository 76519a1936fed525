//! Environment-driven settings
//!
//! Every process reads its configuration from environment variables (seeded
//! from `.env` when present). Values with sensible defaults are optional;
//! the ones a role cannot run without are checked up front by
//! [`Settings::validate_for`], which reports every missing variable at once.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::app::options::{ExecutorMode, Role};
use crate::bus::BusAddress;
use crate::errors::PipelineError;
use crate::logs::{LogFormat, LogLevel};
use crate::storage::content::StoreConfig;

pub const BUS_URL: &str = "BUS_URL";
pub const STORAGE_BACKEND: &str = "STORAGE_BACKEND";
pub const STORAGE_ENDPOINT: &str = "STORAGE_ENDPOINT";
pub const STORAGE_ACCESS_KEY: &str = "STORAGE_ACCESS_KEY";
pub const STORAGE_SECRET_KEY: &str = "STORAGE_SECRET_KEY";
pub const STORAGE_BUCKET: &str = "STORAGE_BUCKET";
pub const STORAGE_REGION: &str = "STORAGE_REGION";
pub const CONTENT_BASE_URL: &str = "CONTENT_BASE_URL";
pub const PROJECT_ID: &str = "PROJECT_ID";
pub const GIT_REPOSITORY_URL: &str = "GIT_REPOSITORY_URL";

/// Storage backend selector
///
/// Only S3-compatible buckets are accepted: the content router reaches
/// uploads over HTTP, so objects kept in an executor's memory could never be
/// served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageBackend {
    #[default]
    S3,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" | "r2" => Ok(StorageBackend::S3),
            "memory" => Err("memory storage is unreachable by the content router".to_string()),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}

/// Object store settings
#[derive(Debug, Clone, Default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<SecretString>,
    pub bucket: Option<String>,
    pub region: String,
}

/// Install/build commands run inside the fetched repository
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub install_cmd: String,
    pub build_cmd: String,
    /// Directory the build must produce, relative to the repository root
    pub output_dir: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            install_cmd: "npm install".to_string(),
            build_cmd: "npm run build".to_string(),
            output_dir: "dist".to_string(),
        }
    }
}

/// Inputs of one executor run, the only channel from the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorEnv {
    pub project_id: String,
    pub git_repository_url: String,
}

/// Process settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,

    pub bus_url: Option<String>,
    pub storage: StorageSettings,
    pub content_base_url: Option<String>,

    pub project_id: Option<String>,
    pub git_repository_url: Option<String>,

    /// Host the router answers on; preview URLs are `http://{slug}.{router_host}`
    pub router_host: String,
    pub api_addr: String,
    pub gateway_addr: String,
    pub router_addr: String,

    pub accepted_source_hosts: Vec<String>,
    pub executor_mode: ExecutorMode,
    pub reserve_slugs: bool,

    pub workspace_root: PathBuf,
    pub build: BuildSettings,
    pub step_timeout: Duration,
    pub upload_concurrency: usize,
    pub upload_rollback: bool,

    pub log_replay_capacity: usize,
    pub subscriber_queue_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
            log_dir: None,
            bus_url: None,
            storage: StorageSettings {
                region: "auto".to_string(),
                ..Default::default()
            },
            content_base_url: None,
            project_id: None,
            git_repository_url: None,
            router_host: "localhost:8000".to_string(),
            api_addr: "0.0.0.0:9000".to_string(),
            gateway_addr: "0.0.0.0:9002".to_string(),
            router_addr: "0.0.0.0:8000".to_string(),
            accepted_source_hosts: vec!["github.com".to_string()],
            executor_mode: ExecutorMode::Process,
            reserve_slugs: true,
            workspace_root: std::env::temp_dir().join("shipyard"),
            build: BuildSettings::default(),
            step_timeout: Duration::from_secs(900),
            upload_concurrency: 8,
            upload_rollback: true,
            log_replay_capacity: 0,
            subscriber_queue_capacity: 256,
        }
    }
}

impl Settings {
    /// Read settings from the process environment, loading `.env` first
    pub fn from_env() -> Result<Self, PipelineError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut settings = Settings::default();

        if let Some(v) = get("LOG_LEVEL") {
            settings.log_level = parse_var("LOG_LEVEL", &v)?;
        }
        if let Some(v) = get("LOG_FORMAT") {
            settings.log_format = parse_var("LOG_FORMAT", &v)?;
        }
        settings.log_dir = get("LOG_DIR").map(PathBuf::from);

        settings.bus_url = get(BUS_URL);
        if let Some(v) = get(STORAGE_BACKEND) {
            settings.storage.backend = parse_var(STORAGE_BACKEND, &v)?;
        }
        settings.storage.endpoint = get(STORAGE_ENDPOINT);
        settings.storage.access_key = get(STORAGE_ACCESS_KEY);
        settings.storage.secret_key = get(STORAGE_SECRET_KEY).map(SecretString::from);
        settings.storage.bucket = get(STORAGE_BUCKET);
        if let Some(v) = get(STORAGE_REGION) {
            settings.storage.region = v;
        }
        settings.content_base_url = get(CONTENT_BASE_URL);

        settings.project_id = get(PROJECT_ID);
        settings.git_repository_url = get(GIT_REPOSITORY_URL);

        if let Some(v) = get("ROUTER_HOST") {
            settings.router_host = v;
        }
        if let Some(v) = get("API_ADDR") {
            settings.api_addr = v;
        }
        if let Some(v) = get("GATEWAY_ADDR") {
            settings.gateway_addr = v;
        }
        if let Some(v) = get("ROUTER_ADDR") {
            settings.router_addr = v;
        }

        if let Some(v) = lookup("ACCEPTED_SOURCE_HOSTS") {
            settings.accepted_source_hosts = v
                .split(',')
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Some(v) = get("EXECUTOR_MODE") {
            settings.executor_mode = parse_var("EXECUTOR_MODE", &v)?;
        }
        if let Some(v) = get("RESERVE_SLUGS") {
            settings.reserve_slugs = parse_bool("RESERVE_SLUGS", &v)?;
        }

        if let Some(v) = get("WORKSPACE_ROOT") {
            settings.workspace_root = PathBuf::from(v);
        }
        if let Some(v) = get("BUILD_INSTALL_CMD") {
            settings.build.install_cmd = v;
        }
        if let Some(v) = get("BUILD_CMD") {
            settings.build.build_cmd = v;
        }
        if let Some(v) = get("BUILD_OUTPUT_DIR") {
            settings.build.output_dir = v;
        }
        if let Some(v) = get("STEP_TIMEOUT_SECS") {
            settings.step_timeout = Duration::from_secs(parse_var("STEP_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("UPLOAD_CONCURRENCY") {
            settings.upload_concurrency = parse_var::<usize>("UPLOAD_CONCURRENCY", &v)?.max(1);
        }
        if let Some(v) = get("UPLOAD_ROLLBACK") {
            settings.upload_rollback = parse_bool("UPLOAD_ROLLBACK", &v)?;
        }
        if let Some(v) = get("LOG_REPLAY_CAPACITY") {
            settings.log_replay_capacity = parse_var("LOG_REPLAY_CAPACITY", &v)?;
        }
        if let Some(v) = get("SUBSCRIBER_QUEUE_CAPACITY") {
            settings.subscriber_queue_capacity =
                parse_var::<usize>("SUBSCRIBER_QUEUE_CAPACITY", &v)?.max(1);
        }

        Ok(settings)
    }

    /// Fail with every variable `role` needs but does not have
    pub fn validate_for(&self, role: Role) -> Result<(), PipelineError> {
        let mut missing = Vec::new();

        if role.runs_api() || role.runs_gateway() || role == Role::Executor {
            require(&mut missing, BUS_URL, self.bus_url.is_some());
        }

        let runs_executor = role == Role::Executor
            || (role.runs_api() && self.executor_mode == ExecutorMode::Task);
        if runs_executor {
            require(&mut missing, STORAGE_ENDPOINT, self.storage.endpoint.is_some());
            require(&mut missing, STORAGE_ACCESS_KEY, self.storage.access_key.is_some());
            require(&mut missing, STORAGE_SECRET_KEY, self.storage.secret_key.is_some());
            require(&mut missing, STORAGE_BUCKET, self.storage.bucket.is_some());
        }

        if role == Role::Executor {
            require(&mut missing, PROJECT_ID, self.project_id.is_some());
            require(&mut missing, GIT_REPOSITORY_URL, self.git_repository_url.is_some());
        }

        if role.runs_router() {
            require(&mut missing, CONTENT_BASE_URL, self.content_base_url.is_some());
        }

        if !missing.is_empty() {
            return Err(PipelineError::StartupConfigMissing(missing));
        }
        self.check_bus_reach(role)
    }

    // An in-process bus only works when every publisher and subscriber of
    // log events shares this process
    fn check_bus_reach(&self, role: Role) -> Result<(), PipelineError> {
        let Some(raw) = self.bus_url.as_deref() else {
            return Ok(());
        };
        if BusAddress::parse(raw)? != BusAddress::Memory {
            return Ok(());
        }
        if role == Role::All && self.executor_mode == ExecutorMode::Task {
            return Ok(());
        }
        Err(PipelineError::ConfigError(format!(
            "{BUS_URL}=memory needs --role=all with EXECUTOR_MODE=task; \
             role {} with executor mode {:?} would publish into a bus nobody else sees",
            role, self.executor_mode
        )))
    }

    pub fn bus_address(&self) -> Result<BusAddress, PipelineError> {
        let raw = self
            .bus_url
            .as_deref()
            .ok_or_else(|| PipelineError::StartupConfigMissing(vec![BUS_URL.to_string()]))?;
        BusAddress::parse(raw)
    }

    pub fn store_config(&self) -> Result<StoreConfig, PipelineError> {
        let StorageBackend::S3 = self.storage.backend;
        match (
            &self.storage.endpoint,
            &self.storage.access_key,
            &self.storage.secret_key,
            &self.storage.bucket,
        ) {
            (Some(endpoint), Some(access_key), Some(secret_key), Some(bucket)) => {
                Ok(StoreConfig {
                    endpoint: endpoint.clone(),
                    bucket: bucket.clone(),
                    region: self.storage.region.clone(),
                    access_key: access_key.clone(),
                    secret_key: secret_key.clone(),
                })
            }
            _ => {
                let mut missing = Vec::new();
                require(&mut missing, STORAGE_ENDPOINT, self.storage.endpoint.is_some());
                require(&mut missing, STORAGE_ACCESS_KEY, self.storage.access_key.is_some());
                require(&mut missing, STORAGE_SECRET_KEY, self.storage.secret_key.is_some());
                require(&mut missing, STORAGE_BUCKET, self.storage.bucket.is_some());
                Err(PipelineError::StartupConfigMissing(missing))
            }
        }
    }

    pub fn executor_env(&self) -> Result<ExecutorEnv, PipelineError> {
        match (&self.project_id, &self.git_repository_url) {
            (Some(project_id), Some(git_repository_url)) => Ok(ExecutorEnv {
                project_id: project_id.clone(),
                git_repository_url: git_repository_url.clone(),
            }),
            _ => {
                let mut missing = Vec::new();
                require(&mut missing, PROJECT_ID, self.project_id.is_some());
                require(&mut missing, GIT_REPOSITORY_URL, self.git_repository_url.is_some());
                Err(PipelineError::StartupConfigMissing(missing))
            }
        }
    }

    pub fn content_base_url(&self) -> Result<Url, PipelineError> {
        let raw = self.content_base_url.as_deref().ok_or_else(|| {
            PipelineError::StartupConfigMissing(vec![CONTENT_BASE_URL.to_string()])
        })?;
        Url::parse(raw).map_err(|e| PipelineError::ConfigError(format!("invalid {CONTENT_BASE_URL}: {e}")))
    }
}

fn require(missing: &mut Vec<String>, key: &str, present: bool) {
    if !present {
        missing.push(key.to_string());
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, PipelineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| PipelineError::ConfigError(format!("{key}={value:?}: {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, PipelineError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PipelineError::ConfigError(format!("{key}={value:?}: expected a boolean"))),
    }
}
