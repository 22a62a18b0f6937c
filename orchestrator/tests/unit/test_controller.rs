//! Deployment controller tests with a scripted runner

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::Notify;
use uuid::Uuid;

use orchestrator::deploy::fsm::DeploymentStatus;
use orchestrator::deploy::result::{ExecutionResult, ExecutionStatus};
use orchestrator::deploy::state::AuxiliaryKind;
use orchestrator::deploy::job::{Job, Phase};
use orchestrator::deploy::{AdHocRun, Command, DeploymentConfig, DeploymentController};
use orchestrator::engine::{ExecutionEnvironment, ExecutionRequest, PlaybookRunner};
use orchestrator::errors::OrchestratorError;
use orchestrator::inventory::model::{HostSpec, NetworkMode, NetworkSettings, NodeRole};
use orchestrator::inventory::WizardState;
use orchestrator::storage::layout::StorageLayout;
use orchestrator::transport::channel::ExecutionChannel;
use orchestrator::transport::message::ExecutionEvent;
use orchestrator::transport::registry::TransportRegistry;
use orchestrator::workers::deployer;

const SECRET: &str = "s3cret-become-pw";

/// Runner whose outcome per job id is decided by the test
#[derive(Default)]
struct ScriptedRunner {
    failing: Mutex<HashSet<String>>,
    gated: Mutex<HashSet<String>>,
    gate: Notify,
    executed: Mutex<Vec<String>>,
    inventories: Mutex<HashMap<String, String>>,
}

impl ScriptedRunner {
    fn fail(&self, job_id: &str) {
        self.failing.lock().unwrap().insert(job_id.to_string());
    }

    fn succeed(&self, job_id: &str) {
        self.failing.lock().unwrap().remove(job_id);
    }

    /// Block this job until `release` is called or it is cancelled
    fn hold(&self, job_id: &str) {
        self.gated.lock().unwrap().insert(job_id.to_string());
    }

    fn release(&self) {
        self.gated.lock().unwrap().clear();
        self.gate.notify_waiters();
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn count(&self, job_id: &str) -> usize {
        self.executed().iter().filter(|id| *id == job_id).count()
    }
}

#[async_trait]
impl PlaybookRunner for ScriptedRunner {
    async fn execute(
        &self,
        request: ExecutionRequest,
        channel: Arc<ExecutionChannel>,
    ) -> ExecutionResult {
        let id = request.job.id.clone();
        self.executed.lock().unwrap().push(id.clone());
        self.inventories
            .lock()
            .unwrap()
            .insert(id.clone(), request.inventory.clone());
        channel.publish(ExecutionEvent::start(&request.job.executable));

        let mut status = if self.failing.lock().unwrap().contains(&id) {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Success
        };
        let cancel = channel.cancel_token();
        loop {
            // Registered before the check so a release in between is not lost
            let released = self.gate.notified();
            if !self.gated.lock().unwrap().contains(&id) {
                break;
            }
            tokio::select! {
                _ = released => {}
                _ = cancel.cancelled() => {
                    status = ExecutionStatus::Cancelled;
                    break;
                }
            }
        }

        let (return_code, reason) = match status {
            ExecutionStatus::Success => (Some(0), None),
            ExecutionStatus::Cancelled => (None, Some("Playbook execution cancelled".to_string())),
            _ => (Some(2), Some("Playbook execution failed with exit code 2".to_string())),
        };
        let log = format!("running {}\nfinished {}\n", id, status);
        channel.publish(if status.is_success() {
            ExecutionEvent::complete(0)
        } else {
            ExecutionEvent::error(status, reason.clone().unwrap_or_default(), return_code)
        });

        ExecutionResult {
            execution_id: Uuid::new_v4(),
            job_id: id,
            status,
            log,
            completed_at: Utc::now(),
            return_code,
            duration_ms: 1,
            reason,
        }
    }
}

fn host(name: &str, address: &str, roles: &[NodeRole]) -> HostSpec {
    HostSpec {
        hostname: name.to_string(),
        address: address.to_string(),
        roles: roles.to_vec(),
        ..Default::default()
    }
}

fn wizard() -> WizardState {
    WizardState {
        cluster_name: Some("thinkube".to_string()),
        domain_name: Some("example.org".to_string()),
        login_user: Some("thinkube".to_string()),
        admin_username: Some("tkadmin".to_string()),
        hosts: vec![
            host("vilanova1", "192.168.1.101", &[NodeRole::ControlPlane]),
            host("vilanova2", "192.168.1.102", &[NodeRole::Worker]),
        ],
        network: Some(NetworkSettings {
            mode: Some(NetworkMode::Lan),
            lan_cidr: Some("192.168.1.0/24".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn config(manual: bool) -> DeploymentConfig {
    DeploymentConfig {
        wizard: wizard(),
        manual,
        environment: ExecutionEnvironment::new().with_become_password(SECRET),
        ..Default::default()
    }
}

/// Queue for the wizard above with default features
const QUEUE: &[&str] = &[
    "setup-ssh-keys",
    "test-ssh-connectivity",
    "setup-env",
    "dns-setup",
    "microk8s-setup",
    "microk8s-join-workers",
    "coredns-setup",
    "keycloak-deploy",
    "harbor-deploy",
];

struct Fixture {
    _dir: TempDir,
    layout: StorageLayout,
    runner: Arc<ScriptedRunner>,
}

impl Fixture {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.setup().await.unwrap();
        Self {
            _dir: dir,
            layout,
            runner: Arc::new(ScriptedRunner::default()),
        }
    }

    fn controller(&self) -> DeploymentController {
        DeploymentController::new(
            self.runner.clone(),
            Arc::new(TransportRegistry::new()),
            self.layout.deployment_store(),
        )
    }

    fn failure_logs(&self) -> Vec<String> {
        std::fs::read_dir(self.layout.failures_dir().path())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn is_invalid_state<T: std::fmt::Debug>(result: Result<T, OrchestratorError>) -> bool {
    matches!(result, Err(OrchestratorError::InvalidState(_)))
}

#[tokio::test]
async fn test_automatic_deployment_runs_every_job_in_order() {
    let fixture = Fixture::new().await;
    let mut controller = fixture.controller();

    let status = controller.run(Command::Start(config(false))).await.unwrap();

    assert_eq!(status, DeploymentStatus::Complete);
    assert_eq!(fixture.runner.executed(), QUEUE);
    let state = controller.state();
    assert_eq!(state.cursor(), QUEUE.len());
    assert_eq!(state.progress_percent(), 100);
    assert_eq!(state.results.len(), QUEUE.len());
    assert!(state.failure.is_none());
    assert!(!state.is_executing());

    // Trust is not established yet for the first jobs
    let inventories = fixture.runner.inventories.lock().unwrap().clone();
    assert_ne!(inventories["setup-ssh-keys"], inventories["setup-env"]);
    assert_eq!(inventories["setup-ssh-keys"], inventories["test-ssh-connectivity"]);
}

#[tokio::test]
async fn test_failure_stops_and_retry_resumes_at_cursor() {
    let fixture = Fixture::new().await;
    let mut controller = fixture.controller();
    fixture.runner.fail("dns-setup");

    let status = controller.run(Command::Start(config(false))).await.unwrap();

    assert_eq!(status, DeploymentStatus::Failed);
    let state = controller.state();
    assert_eq!(state.cursor(), 3);
    assert_eq!(state.current_job().unwrap().id, "dns-setup");
    let failure = state.failure.as_ref().unwrap();
    assert_eq!(failure.job_id, "dns-setup");
    assert_eq!(failure.title, "Setup DNS");
    assert!(failure.log.contains("running dns-setup"));
    assert!(state.fsm.error().unwrap().contains("Setup DNS"));
    assert!(fixture.runner.executed().iter().all(|id| id != "microk8s-setup"));

    let logs = fixture.failure_logs();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].ends_with("_dns-setup.log"));

    // Completed jobs are not re-run
    fixture.runner.succeed("dns-setup");
    let status = controller.run(Command::Retry(None)).await.unwrap();
    assert_eq!(status, DeploymentStatus::Complete);
    assert_eq!(fixture.runner.count("setup-ssh-keys"), 1);
    assert_eq!(fixture.runner.count("dns-setup"), 2);
    assert_eq!(controller.state().fsm.retry_count(), 0);
    assert!(controller.state().failure.is_none());
}

#[tokio::test]
async fn test_rollback_undoes_attempted_jobs_in_reverse() {
    let fixture = Fixture::new().await;
    let mut controller = fixture.controller();
    fixture.runner.fail("microk8s-setup");

    controller.run(Command::Start(config(false))).await.unwrap();
    assert_eq!(controller.state().cursor(), 4);

    let status = controller.run(Command::Rollback(None)).await.unwrap();

    assert_eq!(status, DeploymentStatus::Failed);
    let executed = fixture.runner.executed();
    assert_eq!(
        &executed[executed.len() - 2..],
        &["rollback-microk8s".to_string(), "rollback-dns".to_string()]
    );

    let state = controller.state();
    let rollback = state.rollback.as_ref().unwrap();
    assert!(!rollback.running);
    assert!(rollback.failure.is_none());
    assert_eq!(rollback.results.len(), 2);

    // Cursor moves back to the first undone job; forward results stay on record
    assert_eq!(state.cursor(), 3);
    assert_eq!(state.result("dns-setup").unwrap().status, ExecutionStatus::Success);
    assert_eq!(state.result("microk8s-setup").unwrap().status, ExecutionStatus::Failed);
    assert!(state.is_rolled_back("dns-setup"));
    assert!(state.is_rolled_back("microk8s-setup"));
    assert!(!state.is_rolled_back("setup-env"));
    assert!(state.fsm.error().is_none());

    let response = state.to_response();
    assert!(response.jobs[3].rolled_back);
    assert!(!response.jobs[2].rolled_back);

    // The failed job's log is still exported
    let export = controller.export_logs();
    assert!(export.contains("microk8s-setup (rolled back)"));
    assert!(export.contains("finished failed"));

    // Nothing is left to undo until the jobs run again
    assert!(is_invalid_state(controller.begin(Command::Rollback(None))));

    // The deployment can continue from there
    fixture.runner.succeed("microk8s-setup");
    let status = controller.run(Command::Retry(None)).await.unwrap();
    assert_eq!(status, DeploymentStatus::Complete);
    assert_eq!(fixture.runner.count("dns-setup"), 2);
    let state = controller.state();
    assert!(state.rolled_back.is_empty());
    assert_eq!(state.result("microk8s-setup").unwrap().status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_failed_rollback_is_reported() {
    let fixture = Fixture::new().await;
    let mut controller = fixture.controller();
    fixture.runner.fail("microk8s-setup");
    fixture.runner.fail("rollback-dns");

    controller.run(Command::Start(config(false))).await.unwrap();
    let status = controller.run(Command::Rollback(None)).await.unwrap();

    assert_eq!(status, DeploymentStatus::Failed);
    let state = controller.state();
    let rollback = state.rollback.as_ref().unwrap();
    assert_eq!(rollback.failure.as_ref().unwrap().job_id, "rollback-dns");
    assert!(state.fsm.error().unwrap().contains("Reset DNS"));
    assert_eq!(state.cursor(), 4);
}

#[tokio::test]
async fn test_rollback_without_compensating_jobs_is_rejected() {
    let fixture = Fixture::new().await;
    let mut controller = fixture.controller();
    fixture.runner.fail("setup-ssh-keys");

    controller.run(Command::Start(config(false))).await.unwrap();

    assert!(is_invalid_state(controller.begin(Command::Rollback(None))));
    assert_eq!(controller.state().status(), DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_invalid_commands_are_rejected() {
    let fixture = Fixture::new().await;
    let mut controller = fixture.controller();

    assert!(is_invalid_state(controller.begin(Command::Retry(None))));
    assert!(is_invalid_state(controller.begin(Command::Continue(None))));
    assert!(is_invalid_state(controller.begin(Command::Rollback(None))));

    // Configuration problems surface before anything runs
    let mut bad = config(false);
    bad.wizard.hosts[1].address = "192.168.1.101".to_string();
    match controller.begin(Command::Start(bad)) {
        Err(OrchestratorError::Validation(validation)) => {
            assert_eq!(validation.conflicting_hosts, vec!["vilanova1", "vilanova2"]);
        }
        other => panic!("expected a validation error, got {:?}", other.map(|_| ())),
    }
    assert_eq!(controller.state().status(), DeploymentStatus::Idle);
    assert!(fixture.runner.executed().is_empty());
}

#[tokio::test]
async fn test_manual_mode_waits_for_continue() {
    let fixture = Fixture::new().await;
    let mut controller = fixture.controller();

    let status = controller.run(Command::Start(config(true))).await.unwrap();

    assert_eq!(status, DeploymentStatus::Running);
    assert!(controller.state().awaiting_continue);
    assert_eq!(fixture.runner.executed(), &QUEUE[..1]);

    controller.run(Command::Continue(None)).await.unwrap();
    assert_eq!(fixture.runner.executed(), &QUEUE[..2]);
    assert!(is_invalid_state(controller.begin(Command::Start(config(true)))));

    // Auxiliary runs leave the queue alone
    controller.run(Command::Diagnostic).await.unwrap();
    controller.run(Command::Compensate("dns-setup".to_string())).await.unwrap();
    let state = controller.state();
    assert_eq!(state.cursor(), 2);
    assert!(state.awaiting_continue);
    assert_eq!(state.auxiliary.len(), 2);
    assert_eq!(state.auxiliary[0].kind, AuxiliaryKind::Diagnostic);
    assert_eq!(state.auxiliary[1].job.id, "rollback-dns");
    assert!(state.auxiliary.iter().all(|run| run.result.is_some()));

    assert!(matches!(
        controller.begin(Command::Compensate("setup-env".to_string())),
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_auxiliary_jobs_need_manual_mode() {
    let fixture = Fixture::new().await;
    let mut controller = fixture.controller();
    fixture.runner.fail("setup-env");
    controller.run(Command::Start(config(false))).await.unwrap();

    assert!(is_invalid_state(controller.begin(Command::Diagnostic)));
    assert!(is_invalid_state(
        controller.begin(Command::Compensate("dns-setup".to_string()))
    ));
}

#[tokio::test]
async fn test_restore_after_restart() {
    let fixture = Fixture::new().await;
    let mut controller = fixture.controller();
    fixture.runner.fail("dns-setup");
    controller.run(Command::Start(config(false))).await.unwrap();
    drop(controller);

    let mut restored = fixture.controller();
    assert!(restored.restore().await.unwrap());
    let state = restored.state();
    assert_eq!(state.status(), DeploymentStatus::Failed);
    assert_eq!(state.cursor(), 3);
    assert_eq!(state.failure.as_ref().unwrap().job_id, "dns-setup");

    // Secrets were never persisted, so the configuration must be sent again
    assert!(is_invalid_state(restored.begin(Command::Retry(None))));
    fixture.runner.succeed("dns-setup");
    let status = restored.run(Command::Retry(Some(config(false)))).await.unwrap();
    assert_eq!(status, DeploymentStatus::Complete);
    assert_eq!(fixture.runner.count("setup-ssh-keys"), 1);
}

#[tokio::test]
async fn test_restore_marks_running_deployment_interrupted() {
    let fixture = Fixture::new().await;
    let store = fixture.layout.deployment_store();

    let mut controller = fixture.controller();
    fixture.runner.fail("setup-env");
    controller.run(Command::Start(config(false))).await.unwrap();
    let mut state = controller.state().clone();
    state.fsm = Default::default();
    state.fsm.process(orchestrator::deploy::fsm::DeploymentEvent::Start).unwrap();
    state.failure = None;
    state.streaming_job = Some("ansible/00_initial_setup/20_setup_env.yaml".to_string());
    store.save(&state).await.unwrap();

    let mut restored = fixture.controller();
    assert!(restored.restore().await.unwrap());
    let state = restored.state();
    assert_eq!(state.status(), DeploymentStatus::Failed);
    assert!(state.fsm.error().unwrap().contains("Interrupted"));
    assert_eq!(state.failure.as_ref().unwrap().job_id, "setup-env");
    assert!(!state.is_executing());
}

#[tokio::test]
async fn test_secrets_never_reach_disk_or_export() {
    let fixture = Fixture::new().await;
    let mut controller = fixture.controller();
    fixture.runner.fail("dns-setup");
    controller.run(Command::Start(config(false))).await.unwrap();

    let snapshot =
        std::fs::read_to_string(fixture.layout.deployment_state_file().path()).unwrap();
    assert!(snapshot.contains("dns-setup"));
    assert!(!snapshot.contains(SECRET));

    let export = controller.export_logs();
    assert!(export.contains("Setup DNS"));
    assert!(export.contains("running dns-setup"));
    assert!(!export.contains(SECRET));
}

#[tokio::test]
async fn test_ad_hoc_extra_vars_never_reach_disk() {
    let fixture = Fixture::new().await;
    let mut controller = fixture.controller();

    let job = Job::new("ad-hoc", Phase::Test, "Deploy Keycloak", "ansible/keycloak.yaml")
        .with_param("admin_password", "s3cr3t-admin")
        .with_param("replicas", 2);
    let status = controller
        .run(Command::AdHoc(AdHocRun {
            job,
            environment: ExecutionEnvironment::new(),
            inventory: Some("all: {}".to_string()),
        }))
        .await
        .unwrap();
    assert_eq!(status, DeploymentStatus::Idle);

    // The runner received the parameters
    assert_eq!(fixture.runner.executed(), vec!["ad-hoc".to_string()]);
    let state = controller.state();
    assert_eq!(state.auxiliary.len(), 1);
    assert!(state.auxiliary[0].result.as_ref().unwrap().is_success());
    assert!(state.auxiliary[0].job.params.is_empty());

    let snapshot =
        std::fs::read_to_string(fixture.layout.deployment_state_file().path()).unwrap();
    assert!(snapshot.contains("ad-hoc"));
    assert!(!snapshot.contains("s3cr3t-admin"));
    assert!(!controller.export_logs().contains("s3cr3t-admin"));
}

// ------------------------------- WORKER ----------------------------------- //

fn never() -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(std::future::pending())
}

async fn wait_for<F>(handle: &deployer::DeploymentHandle, mut done: F)
where
    F: FnMut(&orchestrator::deploy::state::DeploymentState) -> bool,
{
    let mut rx = handle.watch();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|state| done(state)))
        .await
        .expect("timed out waiting for state")
        .unwrap();
}

#[tokio::test]
async fn test_worker_rejects_commands_while_executing() {
    let fixture = Fixture::new().await;
    let controller = fixture.controller();
    fixture.runner.hold("setup-ssh-keys");
    let (handle, commands) = deployer::channel(&deployer::Options::default(), &controller);
    let worker = tokio::spawn(deployer::run(controller, commands, never()));

    let accepted = handle.submit(Command::Start(config(false))).await.unwrap();
    assert_eq!(accepted.status, DeploymentStatus::Running);
    wait_for(&handle, |state| state.is_executing()).await;

    // Status reads never block, commands are refused
    assert_eq!(handle.snapshot().status(), DeploymentStatus::Running);
    assert!(is_invalid_state(handle.submit(Command::Reset).await));
    assert!(handle.transport().active().is_some());

    fixture.runner.release();
    wait_for(&handle, |state| state.status() == DeploymentStatus::Complete).await;
    assert!(handle.export_logs().contains("harbor-deploy"));

    drop(handle);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_worker_cancel_fails_the_job() {
    let fixture = Fixture::new().await;
    let controller = fixture.controller();
    fixture.runner.hold("setup-env");
    let (handle, commands) = deployer::channel(&deployer::Options::default(), &controller);
    let worker = tokio::spawn(deployer::run(controller, commands, never()));

    assert!(!handle.cancel());
    handle.submit(Command::Start(config(false))).await.unwrap();
    wait_for(&handle, |state| {
        state.streaming_job.as_deref() == Some("ansible/00_initial_setup/20_setup_env.yaml")
    })
    .await;

    assert!(handle.cancel());
    wait_for(&handle, |state| state.status() == DeploymentStatus::Failed).await;
    let state = handle.snapshot();
    assert_eq!(state.result("setup-env").unwrap().status, ExecutionStatus::Cancelled);
    assert!(!handle.cancel());

    drop(handle);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_worker_shutdown_cancels_executing_job() {
    let fixture = Fixture::new().await;
    let controller = fixture.controller();
    fixture.runner.hold("setup-ssh-keys");
    let (handle, commands) = deployer::channel(&deployer::Options::default(), &controller);
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let worker = tokio::spawn(deployer::run(
        controller,
        commands,
        Box::pin(async move {
            let _ = rx.await;
        }),
    ));

    handle.submit(Command::Start(config(false))).await.unwrap();
    wait_for(&handle, |state| state.is_executing()).await;

    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();

    let state = handle.snapshot();
    assert_eq!(state.status(), DeploymentStatus::Failed);
    assert_eq!(
        state.result("setup-ssh-keys").unwrap().status,
        ExecutionStatus::Cancelled
    );
    assert_eq!(fixture.runner.executed(), &QUEUE[..1]);
    assert!(is_invalid_state_or_shutdown(handle.submit(Command::Reset).await));
}

fn is_invalid_state_or_shutdown<T: std::fmt::Debug>(result: Result<T, OrchestratorError>) -> bool {
    matches!(
        result,
        Err(OrchestratorError::ShutdownError(_)) | Err(OrchestratorError::InvalidState(_))
    )
}
