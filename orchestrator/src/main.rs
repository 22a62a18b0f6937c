//! Deployment orchestrator - Entry Point
//!
//! Serves the local installer API, or talks to a running instance.

use std::collections::HashMap;
use std::env;

use orchestrator::app::options::AppOptions;
use orchestrator::app::run::run;
use orchestrator::engine::environment::{BECOME_PASSWORD_VAR, SSH_PASSWORD_VAR};
use orchestrator::errors::OrchestratorError;
use orchestrator::http::client::HttpClient;
use orchestrator::inventory::{generate, DetailLevel, WizardState};
use orchestrator::logs::{init_logging, LogOptions};
use orchestrator::storage::layout::StorageLayout;
use orchestrator::storage::settings::Settings;
use orchestrator::utils::{version_info, CooldownOptions};

use colored::Colorize;
use openapi_server::models::{FeatureSelection, StartRequest};
use orchestrator::transport::message::{EventKind, ExecutionEvent};
use tracing::{error, info};

const WATCH_ATTEMPTS: u32 = 8;

#[tokio::main]
async fn main() {
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
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Settings are optional; every field has a default
    let settings = match layout.settings_file().read_json_opt::<Settings>().await {
        Ok(settings) => settings.unwrap_or_default(),
        Err(e) => {
            eprintln!("Unable to read settings file: {}", e);
            std::process::exit(1);
        }
    };

    let serving = !is_client_command(&cli_args);
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: (serving && settings.log_to_file).then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(layout, &settings);

    if serving {
        info!("Running deployment orchestrator with options: {:?}", options);
        if let Err(e) = run(options, await_shutdown_signal()).await {
            error!("Failed to run the orchestrator: {e}");
            std::process::exit(1);
        }
        return;
    }

    if let Err(e) = run_command(&cli_args, &options).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

const CLIENT_COMMANDS: &[&str] = &[
    "inventory",
    "start",
    "continue",
    "retry",
    "rollback",
    "cancel",
    "status",
    "export-logs",
    "watch",
    "diagnostic",
    "compensate",
];

fn is_client_command(cli_args: &HashMap<String, String>) -> bool {
    !cli_args.contains_key("serve") && CLIENT_COMMANDS.iter().any(|c| cli_args.contains_key(*c))
}

async fn run_command(
    cli_args: &HashMap<String, String>,
    options: &AppOptions,
) -> Result<(), OrchestratorError> {
    // Rendered locally from the saved wizard state; no server needed
    if let Some(mode) = cli_args.get("inventory") {
        let level: DetailLevel = match mode.as_str() {
            "true" => DetailLevel::Full,
            other => other.parse().map_err(OrchestratorError::ConfigError)?,
        };
        let wizard: WizardState = options
            .storage
            .layout
            .session_config_file()
            .read_json_opt()
            .await?
            .ok_or_else(|| OrchestratorError::NotFound("no saved configuration".to_string()))?;
        print!("{}", generate(level, &wizard)?.to_yaml()?);
        return Ok(());
    }

    let client = HttpClient::new(&options.server.base_url())?;

    if cli_args.contains_key("status") {
        let status = client.status().await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    if let Some(path) = cli_args.get("export-logs") {
        let text = client.export_logs().await?;
        if path == "true" {
            print!("{}", text);
        } else {
            tokio::fs::write(path, text).await?;
            println!("Logs written to {}", path);
        }
        return Ok(());
    }

    if let Some(job) = cli_args.get("watch") {
        let terminal = client
            .watch(job, &CooldownOptions::default(), WATCH_ATTEMPTS, print_event)
            .await?;
        if terminal.status.is_some_and(|s| !s.is_success()) {
            return Err(OrchestratorError::ProcessError(terminal.message));
        }
        return Ok(());
    }

    let response = if cli_args.contains_key("cancel") {
        client.cancel().await?
    } else if cli_args.contains_key("diagnostic") {
        client.diagnostic().await?
    } else if let Some(job) = cli_args.get("compensate") {
        client.compensate(job).await?
    } else {
        let action = ["start", "continue", "retry", "rollback"]
            .into_iter()
            .find(|a| cli_args.contains_key(*a))
            .ok_or_else(|| OrchestratorError::ConfigError("no command given".to_string()))?;
        let request = start_request(cli_args);
        client.action(action, request.as_ref()).await?
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn print_event(event: &ExecutionEvent) {
    let label = format!("[{}]", event.kind.as_str());
    let label = match event.kind {
        EventKind::Play | EventKind::Task => label.cyan().bold(),
        EventKind::Ok | EventKind::Complete => label.green(),
        EventKind::Changed => label.yellow(),
        EventKind::Failed | EventKind::Error => label.red().bold(),
        EventKind::Skipped | EventKind::Output => label.dimmed(),
        EventKind::Start => label.blue().bold(),
    };
    println!("{} {}", label, event.message);
}

/// Secrets come from the environment, never from the command line
fn start_request(cli_args: &HashMap<String, String>) -> Option<StartRequest> {
    let become_password = env::var(BECOME_PASSWORD_VAR).ok();
    let ssh_password = env::var(SSH_PASSWORD_VAR).ok();
    let manual = cli_args.get("manual").map(|v| v != "false");
    let run_tests = cli_args.get("run-tests").map(|v| v != "false");

    if become_password.is_none() && ssh_password.is_none() && manual.is_none() && run_tests.is_none()
    {
        return None;
    }
    Some(StartRequest {
        manual,
        become_password,
        ssh_password,
        features: run_tests.map(|run_tests| FeatureSelection {
            run_tests: Some(run_tests),
            ..Default::default()
        }),
        ..Default::default()
    })
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, shutting down...");
                    }
                    _ = sigint.recv() => {
                        info!("SIGINT received, shutting down...");
                    }
                }
                return;
            }
            _ => error!("Failed to install signal handlers, falling back to Ctrl+C"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received, shutting down...");
}
