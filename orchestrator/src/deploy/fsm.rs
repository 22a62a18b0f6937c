//! Finite State Machine for the deployment lifecycle

use serde::{Deserialize, Serialize};

/// Overall deployment status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// No deployment started
    #[default]
    Idle,

    /// A job (forward or rollback) is executing, or the queue awaits continue
    Running,

    /// Stopped on a failed job; retry or rollback decides what happens next
    Failed,

    /// Every job of the queue succeeded
    Complete,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Idle => "idle",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Complete => "complete",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Begin a new deployment
    Start,

    /// Job at the cursor succeeded; `last` when it was the final job
    JobSucceeded { last: bool },

    /// Job at the cursor failed, timed out or was cancelled
    JobFailed(String),

    /// Re-run the job at the cursor
    Retry,

    /// Run the compensating jobs
    Rollback,

    /// Every compensating job succeeded
    RollbackFinished,

    /// A compensating job failed
    RollbackFailed(String),

    /// Forget the deployment
    Reset,
}

/// Deployment FSM
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    error: Option<String>,
    rolling_back: bool,
    retry_count: u32,
}

impl DeploymentFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the running work is a rollback
    pub fn is_rolling_back(&self) -> bool {
        self.rolling_back
    }

    /// Retries since the last successful job
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        use DeploymentStatus::*;

        let new_state = match (&self.state, &event) {
            // A new deployment may replace anything that is not running
            (Idle | Failed | Complete, DeploymentEvent::Start) => {
                self.error = None;
                self.rolling_back = false;
                self.retry_count = 0;
                Running
            }

            // Forward progress
            (Running, DeploymentEvent::JobSucceeded { last }) if !self.rolling_back => {
                self.retry_count = 0;
                if *last {
                    Complete
                } else {
                    Running
                }
            }
            (Running, DeploymentEvent::JobFailed(err)) if !self.rolling_back => {
                self.error = Some(err.clone());
                Failed
            }

            // Recovery
            (Failed, DeploymentEvent::Retry) => {
                self.error = None;
                self.retry_count += 1;
                Running
            }
            (Failed, DeploymentEvent::Rollback) => {
                self.rolling_back = true;
                Running
            }
            (Running, DeploymentEvent::RollbackFinished) if self.rolling_back => {
                self.rolling_back = false;
                self.error = None;
                Failed
            }
            (Running, DeploymentEvent::RollbackFailed(err)) if self.rolling_back => {
                self.rolling_back = false;
                self.error = Some(err.clone());
                Failed
            }

            (_, DeploymentEvent::Reset) => {
                self.error = None;
                self.rolling_back = false;
                self.retry_count = 0;
                Idle
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!(
                    "Invalid transition: {:?} -> {:?}",
                    state, event
                ));
            }
        };

        self.state = new_state;
        Ok(())
    }

    /// Restore after a restart: nothing can still be running
    pub fn interrupt(&mut self, reason: &str) {
        if self.state == DeploymentStatus::Running {
            self.state = DeploymentStatus::Failed;
            self.rolling_back = false;
            self.error = Some(reason.to_string());
        }
    }
}
