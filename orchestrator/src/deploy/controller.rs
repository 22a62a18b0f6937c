//! Deployment queue controller
//!
//! The controller owns the one [`DeploymentState`] of the process. Commands
//! are split in two halves: [`DeploymentController::begin`] validates the
//! command and applies the state transition synchronously, and
//! [`DeploymentController::perform`] runs the jobs the command unlocked,
//! strictly one at a time. Readers never touch the state directly; they
//! receive published snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::deploy::builder::{build_queue, FeatureFlags, QueuePlan};
use crate::deploy::catalog;
use crate::deploy::export;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};
use crate::deploy::job::{Job, Phase};
use crate::deploy::queue::Queue;
use crate::deploy::result::ExecutionResult;
use crate::deploy::rollback::{compensating_job, rollback_plan};
use crate::deploy::state::{AuxiliaryKind, AuxiliaryRun, DeploymentState, FailureReport, RollbackState};
use crate::engine::{ExecutionEnvironment, ExecutionRequest, PlaybookRunner};
use crate::errors::OrchestratorError;
use crate::inventory::{generate, DetailLevel, WizardState};
use crate::storage::deployment::DeploymentStore;
use crate::transport::channel::ExecutionChannel;
use crate::transport::message::ExecutionEvent;
use crate::transport::registry::TransportRegistry;
use crate::utils::generate_uuid;

/// Everything a deployment needs besides its state. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct DeploymentConfig {
    pub wizard: WizardState,
    pub features: FeatureFlags,
    /// Wait for an explicit continue between jobs
    pub manual: bool,
    pub environment: ExecutionEnvironment,
}

/// Configuration with its inventories rendered once
struct Session {
    config: DeploymentConfig,
    minimal: String,
    full: String,
}

impl Session {
    fn new(config: DeploymentConfig) -> Result<Self, OrchestratorError> {
        let full = generate(DetailLevel::Full, &config.wizard)?.to_yaml()?;
        let minimal = generate(DetailLevel::Minimal, &config.wizard)?.to_yaml()?;
        Ok(Self {
            config,
            minimal,
            full,
        })
    }

    fn inventory(&self, level: DetailLevel) -> &str {
        match level {
            DetailLevel::Minimal => &self.minimal,
            DetailLevel::Full => &self.full,
        }
    }

    fn request(&self, job: &Job) -> ExecutionRequest {
        ExecutionRequest {
            job: job.clone(),
            environment: self.config.environment.clone(),
            inventory: self.inventory(job.inventory).to_string(),
        }
    }
}

/// A single playbook run requested from the stream
#[derive(Debug)]
pub struct AdHocRun {
    pub job: Job,
    pub environment: ExecutionEnvironment,
    /// Inventory YAML; the loaded configuration's inventory otherwise
    pub inventory: Option<String>,
}

#[derive(Debug)]
pub enum Command {
    Start(DeploymentConfig),
    Continue(Option<DeploymentConfig>),
    Retry(Option<DeploymentConfig>),
    Rollback(Option<DeploymentConfig>),
    Reset,
    Diagnostic,
    Compensate(String),
    AdHoc(AdHocRun),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start(_) => "start",
            Command::Continue(_) => "continue",
            Command::Retry(_) => "retry",
            Command::Rollback(_) => "rollback",
            Command::Reset => "reset",
            Command::Diagnostic => "diagnostic",
            Command::Compensate(_) => "compensate",
            Command::AdHoc(_) => "ad_hoc",
        }
    }
}

/// Acknowledgement of an accepted command
#[derive(Debug, Clone)]
pub struct Accepted {
    pub status: DeploymentStatus,
    /// Stream of the run an auxiliary command started
    pub channel: Option<Arc<ExecutionChannel>>,
}

/// What an accepted command left to execute
#[derive(Debug)]
pub enum Work {
    Idle,
    Forward,
    Rollback,
    Auxiliary {
        index: usize,
        request: ExecutionRequest,
        channel: Arc<ExecutionChannel>,
    },
}

pub struct DeploymentController {
    runner: Arc<dyn PlaybookRunner>,
    transport: Arc<TransportRegistry>,
    store: DeploymentStore,
    state: DeploymentState,
    session: Option<Session>,
    publisher: watch::Sender<Arc<DeploymentState>>,
    stop: CancellationToken,
}

impl DeploymentController {
    pub fn new(
        runner: Arc<dyn PlaybookRunner>,
        transport: Arc<TransportRegistry>,
        store: DeploymentStore,
    ) -> Self {
        let state = DeploymentState::default();
        let (publisher, _) = watch::channel(Arc::new(state.clone()));
        Self {
            runner,
            transport,
            store,
            state,
            session: None,
            publisher,
            stop: CancellationToken::new(),
        }
    }

    /// Reload the last snapshot. Returns whether one existed.
    pub async fn restore(&mut self) -> Result<bool, OrchestratorError> {
        let Some(mut state) = self.store.load().await? else {
            return Ok(false);
        };
        state.recover_after_restart();
        self.state = state;
        self.commit().await;
        Ok(true)
    }

    pub fn state(&self) -> &DeploymentState {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DeploymentState>> {
        self.publisher.subscribe()
    }

    pub fn transport(&self) -> Arc<TransportRegistry> {
        self.transport.clone()
    }

    /// Cancelling this token stops the drive loop after the current job
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Cancel the executing job. A no-op when nothing runs.
    pub fn cancel(&self) -> bool {
        self.transport.cancel_active()
    }

    pub fn export_logs(&self) -> String {
        export::render(&self.state, Utc::now())
    }

    /// Begin and perform a command in one go
    pub async fn run(&mut self, command: Command) -> Result<DeploymentStatus, OrchestratorError> {
        let (_, work) = self.begin(command)?;
        self.perform(work).await;
        Ok(self.state.status())
    }

    /// Validate a command against the current state and apply its transition
    pub fn begin(&mut self, command: Command) -> Result<(Accepted, Work), OrchestratorError> {
        info!(command = command.name(), status = %self.state.status(), "Command received");
        if self.state.is_executing() {
            return Err(OrchestratorError::InvalidState(
                "a job is currently executing".to_string(),
            ));
        }

        let work = match command {
            Command::Start(config) => self.begin_start(config)?,
            Command::Continue(config) => self.begin_continue(config)?,
            Command::Retry(config) => self.begin_retry(config)?,
            Command::Rollback(config) => self.begin_rollback(config)?,
            Command::Reset => self.begin_reset()?,
            Command::Diagnostic => {
                self.require_manual()?;
                let job = catalog::job("diagnostic")
                    .ok_or_else(|| OrchestratorError::NotFound("diagnostic job".to_string()))?;
                let request = self.session_request(&job)?;
                self.begin_auxiliary(AuxiliaryKind::Diagnostic, request)
            }
            Command::Compensate(job_id) => {
                self.require_manual()?;
                let job = compensating_job(&job_id)
                    .or_else(|| {
                        catalog::find(&job_id)
                            .filter(|entry| entry.phase == Phase::Rollback)
                            .map(|entry| entry.to_job())
                    })
                    .ok_or_else(|| {
                        OrchestratorError::NotFound(format!("no compensating action for {}", job_id))
                    })?;
                let request = self.session_request(&job)?;
                self.begin_auxiliary(AuxiliaryKind::Compensate, request)
            }
            Command::AdHoc(run) => {
                let inventory = match run.inventory {
                    Some(inventory) => inventory,
                    None => self
                        .session
                        .as_ref()
                        .map(|session| session.inventory(run.job.inventory).to_string())
                        .ok_or_else(|| {
                            OrchestratorError::InvalidState(
                                "no inventory was supplied and no configuration is loaded".to_string(),
                            )
                        })?,
                };
                let request = ExecutionRequest {
                    job: run.job,
                    environment: run.environment,
                    inventory,
                };
                self.begin_auxiliary(AuxiliaryKind::AdHoc, request)
            }
        };

        let channel = match &work {
            Work::Auxiliary { channel, .. } => Some(channel.clone()),
            _ => None,
        };
        Ok((
            Accepted {
                status: self.state.status(),
                channel,
            },
            work,
        ))
    }

    /// Execute whatever the accepted command unlocked
    pub async fn perform(&mut self, work: Work) {
        self.commit().await;
        match work {
            Work::Idle => {}
            Work::Forward => self.drive_forward().await,
            Work::Rollback => self.drive_rollback().await,
            Work::Auxiliary {
                index,
                request,
                channel,
            } => self.run_auxiliary(index, request, channel).await,
        }
    }

    // ------------------------------ COMMANDS ------------------------------ //

    fn begin_start(&mut self, config: DeploymentConfig) -> Result<Work, OrchestratorError> {
        if self.state.status() == DeploymentStatus::Running {
            return Err(OrchestratorError::InvalidState(
                "a deployment is already running".to_string(),
            ));
        }

        let session = Session::new(config)?;
        let plan = QueuePlan::from_wizard(&session.config.wizard)?;
        let jobs = build_queue(&plan, &session.config.features);

        let mut fsm = DeploymentFsm::new();
        fsm.process(DeploymentEvent::Start)
            .map_err(OrchestratorError::InvalidState)?;

        self.state = DeploymentState {
            deployment_id: generate_uuid(),
            fsm,
            queue: Queue::new(jobs),
            manual: session.config.manual,
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        self.transport.clear();
        info!(
            deployment = %self.state.deployment_id,
            jobs = self.state.queue.len(),
            manual = self.state.manual,
            "Deployment started"
        );
        self.session = Some(session);
        Ok(Work::Forward)
    }

    fn begin_continue(&mut self, config: Option<DeploymentConfig>) -> Result<Work, OrchestratorError> {
        if self.state.status() != DeploymentStatus::Running || !self.state.awaiting_continue {
            return Err(OrchestratorError::InvalidState(
                "the deployment is not waiting to continue".to_string(),
            ));
        }
        self.adopt(config)?;
        self.state.awaiting_continue = false;
        Ok(Work::Forward)
    }

    fn begin_retry(&mut self, config: Option<DeploymentConfig>) -> Result<Work, OrchestratorError> {
        if self.state.status() != DeploymentStatus::Failed {
            return Err(OrchestratorError::InvalidState(format!(
                "cannot retry a deployment that is {}",
                self.state.status()
            )));
        }
        let Some(job) = self.state.queue.current() else {
            return Err(OrchestratorError::InvalidState(
                "there is no job to retry".to_string(),
            ));
        };
        info!(job = %job.id, cursor = self.state.queue.cursor(), "Retrying job");

        self.adopt(config)?;
        self.state
            .fsm
            .process(DeploymentEvent::Retry)
            .map_err(OrchestratorError::InvalidState)?;
        self.state.failure = None;
        Ok(Work::Forward)
    }

    fn begin_rollback(&mut self, config: Option<DeploymentConfig>) -> Result<Work, OrchestratorError> {
        if self.state.status() != DeploymentStatus::Failed {
            return Err(OrchestratorError::InvalidState(format!(
                "cannot roll back a deployment that is {}",
                self.state.status()
            )));
        }
        let plan = rollback_plan(&self.state.queue, &self.state.results, &self.state.rolled_back);
        if plan.is_empty() {
            return Err(OrchestratorError::InvalidState(
                "no attempted job has a compensating action".to_string(),
            ));
        }

        self.adopt(config)?;
        self.state
            .fsm
            .process(DeploymentEvent::Rollback)
            .map_err(OrchestratorError::InvalidState)?;

        let forward_indices = plan.iter().map(|p| p.forward_index).collect();
        let jobs: Vec<Job> = plan.into_iter().map(|p| p.job).collect();
        info!(
            jobs = ?jobs.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(),
            "Rolling back"
        );
        self.state.rollback = Some(RollbackState {
            queue: Queue::new(jobs),
            forward_indices,
            results: BTreeMap::new(),
            running: true,
            failure: None,
        });
        Ok(Work::Rollback)
    }

    fn begin_reset(&mut self) -> Result<Work, OrchestratorError> {
        self.state
            .fsm
            .process(DeploymentEvent::Reset)
            .map_err(OrchestratorError::InvalidState)?;
        self.state.awaiting_continue = false;
        if let Some(rollback) = self.state.rollback.as_mut() {
            rollback.running = false;
        }
        info!(deployment = %self.state.deployment_id, "Deployment reset");
        Ok(Work::Idle)
    }

    fn begin_auxiliary(&mut self, kind: AuxiliaryKind, request: ExecutionRequest) -> Work {
        let channel = self.transport.open(&request.job.executable);
        info!(job = %request.job.id, ?kind, "Auxiliary run accepted");
        self.state.streaming_job = Some(channel.key().to_string());
        // Ad hoc extra variables may carry credentials; only the request sees them
        let mut recorded = request.job.clone();
        recorded.params.clear();
        self.state.auxiliary.push(AuxiliaryRun {
            kind,
            job: recorded,
            result: None,
        });
        Work::Auxiliary {
            index: self.state.auxiliary.len() - 1,
            request,
            channel,
        }
    }

    fn require_manual(&self) -> Result<(), OrchestratorError> {
        if self.state.manual {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidState(
                "auxiliary jobs are only available in manual mode".to_string(),
            ))
        }
    }

    /// Replace the configuration if one is given; fail if none is loaded
    fn adopt(&mut self, config: Option<DeploymentConfig>) -> Result<(), OrchestratorError> {
        if let Some(config) = config {
            self.session = Some(Session::new(config)?);
        }
        if self.session.is_none() {
            return Err(OrchestratorError::InvalidState(
                "no deployment configuration is loaded; send it with the request".to_string(),
            ));
        }
        Ok(())
    }

    fn session_request(&self, job: &Job) -> Result<ExecutionRequest, OrchestratorError> {
        self.session
            .as_ref()
            .map(|session| session.request(job))
            .ok_or_else(|| {
                OrchestratorError::InvalidState("no deployment configuration is loaded".to_string())
            })
    }

    // ------------------------------- DRIVING ------------------------------ //

    async fn drive_forward(&mut self) {
        while let Some(job) = self.state.queue.current().cloned() {
            if self.stop.is_cancelled() {
                info!(job = %job.id, "Stopping before the next job");
                return;
            }

            let result = match self.session_request(&job) {
                Ok(request) => self.execute_job(&job, request).await,
                Err(e) => ExecutionResult::not_started(&job.id, e.to_string()),
            };
            self.state.results.insert(job.id.clone(), result.clone());
            self.state.rolled_back.remove(&job.id);

            if !result.is_success() {
                let reason = result
                    .reason
                    .clone()
                    .unwrap_or_else(|| result.status.to_string());
                warn!(job = %job.id, status = %result.status, "Deployment stopped: {}", reason);
                self.state.failure = Some(FailureReport::new(&job, &result));
                self.transition(DeploymentEvent::JobFailed(format!("{}: {}", job.title, reason)));
                self.commit().await;
                return;
            }

            self.state.queue.advance();
            self.state.failure = None;
            let last = self.state.queue.is_finished();
            self.transition(DeploymentEvent::JobSucceeded { last });

            if last {
                info!(deployment = %self.state.deployment_id, "Deployment complete");
                self.commit().await;
                return;
            }
            if self.state.manual {
                self.state.awaiting_continue = true;
                info!(
                    next = ?self.state.queue.current().map(|j| j.id.as_str()),
                    "Waiting for continue"
                );
                self.commit().await;
                return;
            }
            self.commit().await;
        }
    }

    async fn drive_rollback(&mut self) {
        loop {
            let next = self
                .state
                .rollback
                .as_ref()
                .and_then(|rollback| rollback.queue.current().cloned());
            let Some(job) = next else {
                break;
            };
            if self.stop.is_cancelled() {
                info!(job = %job.id, "Stopping before the next compensating job");
                return;
            }

            let result = match self.session_request(&job) {
                Ok(request) => self.execute_job(&job, request).await,
                Err(e) => ExecutionResult::not_started(&job.id, e.to_string()),
            };

            let Some(rollback) = self.state.rollback.as_mut() else {
                return;
            };
            rollback.results.insert(job.id.clone(), result.clone());
            if result.is_success() {
                rollback.queue.advance();
                self.commit().await;
                continue;
            }

            rollback.failure = Some(FailureReport::new(&job, &result));
            rollback.running = false;
            let reason = result
                .reason
                .clone()
                .unwrap_or_else(|| result.status.to_string());
            error!(job = %job.id, "Rollback stopped: {}", reason);
            self.transition(DeploymentEvent::RollbackFailed(format!("{}: {}", job.title, reason)));
            self.commit().await;
            return;
        }

        self.finish_rollback();
        self.commit().await;
    }

    /// Every compensating job succeeded: mark the undone jobs and move the
    /// cursor back to the first of them. Their results stay on record.
    fn finish_rollback(&mut self) {
        let undone: Vec<usize> = match self.state.rollback.as_mut() {
            Some(rollback) => {
                rollback.running = false;
                rollback.forward_indices.clone()
            }
            None => Vec::new(),
        };

        for index in &undone {
            if let Some(job) = self.state.queue.get(*index) {
                self.state.rolled_back.insert(job.id.clone());
            }
        }
        if let Some(first) = undone.iter().copied().min() {
            self.state.queue.rewind_to(first);
        }
        self.state.failure = None;
        self.transition(DeploymentEvent::RollbackFinished);
        info!(cursor = self.state.queue.cursor(), "Rollback complete");
    }

    async fn run_auxiliary(
        &mut self,
        index: usize,
        request: ExecutionRequest,
        channel: Arc<ExecutionChannel>,
    ) {
        let job = request.job.clone();
        let result = self.run_on_channel(&job, request, channel).await;
        self.state.streaming_job = None;
        if let Some(run) = self.state.auxiliary.get_mut(index) {
            run.result = Some(result);
        }
        self.commit().await;
    }

    async fn execute_job(&mut self, job: &Job, request: ExecutionRequest) -> ExecutionResult {
        let channel = self.transport.open(&job.executable);
        self.state.streaming_job = Some(channel.key().to_string());
        self.commit().await;

        let result = self.run_on_channel(job, request, channel).await;
        self.state.streaming_job = None;
        result
    }

    /// Run the job and wait until its stream is closed
    async fn run_on_channel(
        &self,
        job: &Job,
        request: ExecutionRequest,
        channel: Arc<ExecutionChannel>,
    ) -> ExecutionResult {
        let result = self.runner.execute(request, channel.clone()).await;

        if !channel.is_closed() {
            warn!(job = %job.id, "Runner left the stream open, closing it");
            let event = if result.is_success() {
                ExecutionEvent::complete(result.return_code.unwrap_or(0))
            } else {
                ExecutionEvent::error(
                    result.status,
                    result.reason.clone().unwrap_or_default(),
                    result.return_code,
                )
            };
            channel.publish(event);
        }
        channel.wait_closed().await;
        self.transport.release(&channel);

        if !result.is_success() {
            if let Err(e) = self.store.write_failure_log(&job.title, &result).await {
                warn!(job = %job.id, "Failed to write failure log: {}", e);
            }
        }
        result
    }

    fn transition(&mut self, event: DeploymentEvent) {
        if let Err(e) = self.state.fsm.process(event) {
            error!("{}", e);
        }
    }

    /// Publish the state to readers and persist it
    async fn commit(&mut self) {
        self.state.updated_at = Utc::now();
        self.publisher.send_replace(Arc::new(self.state.clone()));
        if let Err(e) = self.store.save(&self.state).await {
            error!("Failed to save deployment snapshot: {}", e);
        }
    }
}
