//! Shipyard - Entry Point
//!
//! Deployment pipeline: an orchestrator API, isolated build executors, a
//! realtime log gateway and a host-based content router, selected by role.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use shipyard::app::options::{AppOptions, Role};
use shipyard::app::run::{run, run_executor};
use shipyard::logs::{init_logging, LogOptions};
use shipyard::storage::settings::Settings;
use shipyard::utils::version_info;

use tracing::{error, info};

const USAGE: &str = "\
Usage: shipyard [--role=all|api|gateway|router|executor] [--version] [--help]

Configuration is read from the environment (and .env when present).";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", version.version);
        return ExitCode::SUCCESS;
    }
    if cli_args.contains_key("help") {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    let role = match cli_args.get("role").map(|r| r.parse::<Role>()) {
        None => Role::default(),
        Some(Ok(role)) => role,
        Some(Err(e)) => {
            eprintln!("{e}\n\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    // Read the settings
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        format: settings.log_format,
        file_prefix: format!("shipyard-{}.log", role),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // Missing configuration is fatal before anything starts
    if let Err(e) = settings.validate_for(role) {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    if role == Role::Executor {
        return match run_executor(&settings).await {
            Ok(report) => {
                info!(
                    "Deployment {} complete: {} files",
                    report.deployment_id, report.files_uploaded
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Executor failed: {e}");
                ExitCode::FAILURE
            }
        };
    }

    info!("Running shipyard {} as {}", version.version, role);
    match run(AppOptions::new(role, settings), await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run shipyard: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
