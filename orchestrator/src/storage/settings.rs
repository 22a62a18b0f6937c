//! Settings file management

use serde::{Deserialize, Serialize};

use crate::deploy::builder::FeatureFlags;
use crate::logs::LogLevel;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Also write daily log files under the storage logs directory
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    /// Wait for an explicit continue between jobs
    #[serde(default)]
    pub manual_mode: bool,

    #[serde(default)]
    pub features: FeatureFlags,

    /// How long a new stream observer has to send its parameters
    #[serde(default = "default_param_timeout")]
    pub ws_param_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_param_timeout() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_to_file: true,
            server: ServerSettings::default(),
            engine: EngineSettings::default(),
            manual_mode: false,
            features: FeatureFlags::default(),
            ws_param_timeout_secs: default_param_timeout(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Playbook execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the playbook path
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Directory holding the `ansible/` tree and `ansible.cfg`
    #[serde(default = "default_playbook_root")]
    pub playbook_root: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Wait between the termination signal and a forced kill
    #[serde(default = "default_kill_grace")]
    pub kill_grace_secs: u64,
}

fn default_program() -> String {
    "ansible-playbook".to_string()
}

fn default_args() -> Vec<String> {
    vec!["-v".to_string()]
}

fn default_playbook_root() -> String {
    "thinkube".to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_kill_grace() -> u64 {
    5
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            playbook_root: default_playbook_root(),
            timeout_secs: default_timeout(),
            kill_grace_secs: default_kill_grace(),
        }
    }
}
