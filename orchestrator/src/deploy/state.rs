//! Deployment state owned by the queue controller

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use openapi_server::models::{DeploymentStatusResponse, FailureSummary, JobSummary, RollbackSummary};

use crate::deploy::fsm::{DeploymentFsm, DeploymentStatus};
use crate::deploy::job::{Job, Phase};
use crate::deploy::queue::Queue;
use crate::deploy::result::{ExecutionResult, ExecutionStatus};

/// What failed, for the UI and for the export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub job_id: String,
    pub title: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub reason: Option<String>,
    pub log: String,
}

impl FailureReport {
    pub fn new(job: &Job, result: &ExecutionResult) -> Self {
        Self {
            job_id: job.id.clone(),
            title: job.title.clone(),
            status: result.status,
            reason: result.reason.clone(),
            log: result.log.clone(),
        }
    }
}

/// Reverse-ordered compensating queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackState {
    pub queue: Queue,
    /// Forward position undone by each compensating job, same order as the queue
    pub forward_indices: Vec<usize>,
    pub results: BTreeMap<String, ExecutionResult>,
    pub running: bool,
    #[serde(default)]
    pub failure: Option<FailureReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxiliaryKind {
    Diagnostic,
    Compensate,
    AdHoc,
}

/// A job run outside the main queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryRun {
    pub kind: AuxiliaryKind,
    pub job: Job,
    #[serde(default)]
    pub result: Option<ExecutionResult>,
}

/// The single deployment of this process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub deployment_id: String,
    pub fsm: DeploymentFsm,
    pub queue: Queue,
    /// Latest result per job id; a retry overwrites the previous entry
    pub results: BTreeMap<String, ExecutionResult>,
    /// Jobs whose effects a compensating job undid; cleared when the job runs again
    #[serde(default)]
    pub rolled_back: BTreeSet<String>,
    /// Stream address of the job executing right now
    #[serde(default)]
    pub streaming_job: Option<String>,
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub awaiting_continue: bool,
    #[serde(default)]
    pub failure: Option<FailureReport>,
    #[serde(default)]
    pub rollback: Option<RollbackState>,
    #[serde(default)]
    pub auxiliary: Vec<AuxiliaryRun>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self {
            deployment_id: String::new(),
            fsm: DeploymentFsm::new(),
            queue: Queue::default(),
            results: BTreeMap::new(),
            rolled_back: BTreeSet::new(),
            streaming_job: None,
            manual: false,
            awaiting_continue: false,
            failure: None,
            rollback: None,
            auxiliary: Vec::new(),
            started_at: None,
            updated_at: Utc::now(),
        }
    }
}

impl DeploymentState {
    pub fn status(&self) -> DeploymentStatus {
        self.fsm.state()
    }

    pub fn cursor(&self) -> usize {
        self.queue.cursor()
    }

    pub fn current_job(&self) -> Option<&Job> {
        self.queue.current()
    }

    pub fn current_phase(&self) -> Option<Phase> {
        if self.rollback.as_ref().is_some_and(|r| r.running) {
            return Some(Phase::Rollback);
        }
        self.queue.current().map(|job| job.phase)
    }

    pub fn progress_percent(&self) -> u8 {
        if self.queue.is_empty() {
            return 0;
        }
        ((self.queue.cursor() * 100) / self.queue.len()).min(100) as u8
    }

    pub fn result(&self, job_id: &str) -> Option<&ExecutionResult> {
        self.results.get(job_id)
    }

    pub fn is_rolled_back(&self, job_id: &str) -> bool {
        self.rolled_back.contains(job_id)
    }

    /// Whether any job or auxiliary run is executing
    pub fn is_executing(&self) -> bool {
        self.streaming_job.is_some()
    }

    /// Make a snapshot loaded after a restart consistent: the process that
    /// was running did not survive.
    pub fn recover_after_restart(&mut self) {
        let interrupted = self.status() == DeploymentStatus::Running && !self.awaiting_continue;
        let was_rolling_back = self.fsm.is_rolling_back();

        if interrupted {
            let reason = "Interrupted by an orchestrator restart";
            self.fsm.interrupt(reason);
            if was_rolling_back {
                if let Some(rollback) = self.rollback.as_mut() {
                    rollback.running = false;
                    if let Some(job) = rollback.queue.current() {
                        rollback.failure = Some(interrupted_report(job, reason));
                    }
                }
            } else if let Some(job) = self.queue.current() {
                self.failure = Some(interrupted_report(job, reason));
            }
        }
        self.streaming_job = None;
        for run in &mut self.auxiliary {
            if run.result.is_none() {
                run.job.title = format!("{} (interrupted)", run.job.title);
            }
        }
        self.updated_at = Utc::now();
    }

    /// Read-only view for the API
    pub fn to_response(&self) -> DeploymentStatusResponse {
        let jobs: Vec<JobSummary> = self
            .queue
            .jobs()
            .iter()
            .map(|job| self.summarize_forward(job))
            .collect();

        DeploymentStatusResponse {
            status: self.status().to_string(),
            cursor: self.queue.cursor(),
            total: self.queue.len(),
            progress_percent: self.progress_percent(),
            manual: self.manual,
            awaiting_continue: self.awaiting_continue,
            current_job: self.queue.current().map(|job| self.summarize_forward(job)),
            phase: self.current_phase().map(|p| p.to_string()),
            streaming_job: self.streaming_job.clone(),
            failure: self.failure.as_ref().map(failure_summary),
            rollback: self.rollback.as_ref().map(|rollback| RollbackSummary {
                running: rollback.running,
                cursor: rollback.queue.cursor(),
                jobs: rollback
                    .queue
                    .jobs()
                    .iter()
                    .map(|job| summarize(job, rollback.results.get(&job.id)))
                    .collect(),
                failure: rollback.failure.as_ref().map(failure_summary),
            }),
            jobs,
            auxiliary: self
                .auxiliary
                .iter()
                .map(|run| summarize(&run.job, run.result.as_ref()))
                .collect(),
        }
    }

    fn summarize_forward(&self, job: &Job) -> JobSummary {
        JobSummary {
            rolled_back: self.is_rolled_back(&job.id),
            ..summarize(job, self.results.get(&job.id))
        }
    }
}

fn interrupted_report(job: &Job, reason: &str) -> FailureReport {
    FailureReport {
        job_id: job.id.clone(),
        title: job.title.clone(),
        status: ExecutionStatus::Failed,
        reason: Some(reason.to_string()),
        log: String::new(),
    }
}

fn summarize(job: &Job, result: Option<&ExecutionResult>) -> JobSummary {
    JobSummary {
        id: job.id.clone(),
        title: job.title.clone(),
        phase: job.phase.to_string(),
        executable: job.executable.clone(),
        result: result.map(|r| r.status.to_string()),
        completed_at: result.map(|r| r.completed_at.to_rfc3339()),
        return_code: result.and_then(|r| r.return_code),
        rolled_back: false,
    }
}

fn failure_summary(report: &FailureReport) -> FailureSummary {
    FailureSummary {
        job_id: report.job_id.clone(),
        title: report.title.clone(),
        status: report.status.to_string(),
        reason: report.reason.clone(),
        log: report.log.clone(),
    }
}
