//! Orchestrator API models

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Acknowledgement of a deployment command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub action: String,
    /// Deployment status once the command was accepted
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error body for rejected requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting_hosts: Vec<String>,
}

/// Optional overrides of the configured feature flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureSelection {
    #[serde(default)]
    pub skip_ssh_setup: Option<bool>,
    #[serde(default)]
    pub deploy_keycloak: Option<bool>,
    #[serde(default)]
    pub deploy_harbor: Option<bool>,
    #[serde(default)]
    pub gpu_operator: Option<bool>,
    #[serde(default)]
    pub run_tests: Option<bool>,
}

/// Start a deployment. Secrets are held in memory for the deployment only.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    /// Wizard state; the saved session configuration when absent
    #[serde(default)]
    pub config: Option<Value>,

    #[serde(default)]
    pub features: Option<FeatureSelection>,

    /// Wait for an explicit continue between jobs
    #[serde(default)]
    pub manual: Option<bool>,

    #[serde(default)]
    pub become_password: Option<String>,

    #[serde(default)]
    pub ssh_password: Option<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl fmt::Debug for StartRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartRequest")
            .field("config", &self.config.is_some())
            .field("features", &self.features)
            .field("manual", &self.manual)
            .field("become_password", &self.become_password.as_ref().map(|_| "********"))
            .field("ssh_password", &self.ssh_password.as_ref().map(|_| "********"))
            .field("environment", &self.environment.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One job of the queue with its latest result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub title: String,
    pub phase: String,
    pub executable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    /// Effects undone by a compensating job since the last run
    #[serde(default)]
    pub rolled_back: bool,
}

/// What failed and why
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSummary {
    pub job_id: String,
    pub title: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub log: String,
}

/// Progress of a rollback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackSummary {
    pub running: bool,
    pub cursor: usize,
    pub jobs: Vec<JobSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
}

/// Read-only view of the deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStatusResponse {
    pub status: String,
    pub cursor: usize,
    pub total: usize,
    pub progress_percent: u8,
    pub manual: bool,
    pub awaiting_continue: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job: Option<JobSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_job: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackSummary>,
    pub jobs: Vec<JobSummary>,
    #[serde(default)]
    pub auxiliary: Vec<JobSummary>,
}

/// Saved wizard state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub saved: bool,
    #[serde(default)]
    pub config: Option<Value>,
}

/// Inventory preview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryResponse {
    pub mode: String,
    pub yaml: String,
}
