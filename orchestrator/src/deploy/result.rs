//! Terminal outcome of one job execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,

    pub job_id: String,

    pub status: ExecutionStatus,

    /// Captured output with secrets scrubbed
    pub log: String,

    pub completed_at: DateTime<Utc>,

    /// Process exit code, absent when killed by a signal or never spawned
    #[serde(default)]
    pub return_code: Option<i32>,

    #[serde(default)]
    pub duration_ms: u64,

    /// Human readable reason for a non-success outcome
    #[serde(default)]
    pub reason: Option<String>,
}

impl ExecutionResult {
    /// Failed result for a job that never reached the runner
    pub fn not_started(job_id: &str, reason: impl Into<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            status: ExecutionStatus::Failed,
            log: String::new(),
            completed_at: Utc::now(),
            return_code: None,
            duration_ms: 0,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
