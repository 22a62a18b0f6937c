//! Error types for the orchestrator

use std::fmt;

use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Process error: {0}")]
    ProcessError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}

/// Configuration problems detected before any playbook is spawned.
///
/// Always recoverable by correcting the wizard input; never reported as a
/// job failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub problems: Vec<String>,

    /// Hostnames involved in address conflicts, sorted
    pub conflicting_hosts: Vec<String>,
}

impl ValidationError {
    pub fn new(problem: impl Into<String>) -> Self {
        Self {
            problems: vec![problem.into()],
            conflicting_hosts: Vec::new(),
        }
    }

    pub fn push(&mut self, problem: impl Into<String>) {
        self.problems.push(problem.into());
    }

    pub fn add_conflict(&mut self, hostnames: &[String]) {
        for hostname in hostnames {
            if !self.conflicting_hosts.contains(hostname) {
                self.conflicting_hosts.push(hostname.clone());
            }
        }
        self.conflicting_hosts.sort();
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Ok when nothing was collected, otherwise self as the error
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.problems.join("; "))
    }
}

impl std::error::Error for ValidationError {}
