//! Application configuration options

use std::time::Duration;

use crate::deploy::builder::FeatureFlags;
use crate::engine::RunnerOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::deployer;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    pub lifecycle: LifecycleOptions,

    pub storage: StorageOptions,

    pub server: ServerOptions,

    pub engine: RunnerOptions,

    pub queue: QueueOptions,

    pub deployer: deployer::Options,
}

impl AppOptions {
    /// Options for the given storage layout and settings file contents
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        let engine = RunnerOptions {
            program: settings.engine.program.clone(),
            base_args: settings.engine.args.clone(),
            playbook_root: settings.engine.playbook_root.clone().into(),
            work_dir: layout.work_dir().path().to_path_buf(),
            timeout: Duration::from_secs(settings.engine.timeout_secs),
            kill_grace: Duration::from_secs(settings.engine.kill_grace_secs),
        };
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions { layout },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
                param_timeout: Duration::from_secs(settings.ws_param_timeout_secs),
            },
            engine,
            queue: QueueOptions {
                manual: settings.manual_mode,
                features: settings.features,
            },
            deployer: deployer::Options::default(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, including cancelling a running job
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    pub layout: StorageLayout,
}

/// Defaults applied to deployments started without explicit choices
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueOptions {
    pub manual: bool,
    pub features: FeatureFlags,
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,

    pub port: u16,

    /// How long a new stream observer has to send its parameters
    pub param_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            param_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerOptions {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}
