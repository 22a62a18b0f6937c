//! Local API tests against the router, without a listening socket

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use orchestrator::app::options::AppOptions;
use orchestrator::app::state::AppState;
use orchestrator::deploy::fsm::DeploymentStatus;
use orchestrator::deploy::result::{ExecutionResult, ExecutionStatus};
use orchestrator::engine::{ExecutionRequest, PlaybookRunner};
use orchestrator::server::serve::router;
use orchestrator::server::state::ServerState;
use orchestrator::storage::layout::StorageLayout;
use orchestrator::transport::channel::ExecutionChannel;
use orchestrator::transport::message::ExecutionEvent;
use orchestrator::workers::deployer;

/// Succeeds immediately
struct InstantRunner;

#[async_trait]
impl PlaybookRunner for InstantRunner {
    async fn execute(
        &self,
        request: ExecutionRequest,
        channel: Arc<ExecutionChannel>,
    ) -> ExecutionResult {
        channel.publish(ExecutionEvent::start(&request.job.executable));
        channel.publish(ExecutionEvent::complete(0));
        ExecutionResult {
            execution_id: Uuid::new_v4(),
            job_id: request.job.id,
            status: ExecutionStatus::Success,
            log: "ok\n".to_string(),
            completed_at: Utc::now(),
            return_code: Some(0),
            duration_ms: 1,
            reason: None,
        }
    }
}

struct Fixture {
    _dir: TempDir,
    app: Arc<AppState>,
    router: Router,
}

impl Fixture {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let options = AppOptions {
            storage: orchestrator::app::options::StorageOptions {
                layout: StorageLayout::new(dir.path()),
            },
            ..Default::default()
        };
        let (app, controller, commands) = AppState::init(&options, Arc::new(InstantRunner))
            .await
            .unwrap();
        let never: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(std::future::pending());
        tokio::spawn(deployer::run(controller, commands, never));

        let app = Arc::new(app);
        let state = Arc::new(ServerState::new(app.clone(), Duration::from_secs(1)));
        Self {
            _dir: dir,
            app,
            router: router(state),
        }
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = self.call(method, uri, body).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}

fn wizard() -> Value {
    json!({
        "cluster_name": "thinkube",
        "domain_name": "example.org",
        "login_user": "thinkube",
        "admin_username": "tkadmin",
        "hosts": [
            {"hostname": "vilanova1", "address": "192.168.1.101", "roles": ["control_plane"]},
            {"hostname": "vilanova2", "address": "192.168.1.102", "roles": ["worker"]}
        ],
        "network": {"mode": "lan", "lan_cidr": "192.168.1.0/24"}
    })
}

#[tokio::test]
async fn test_health_and_idle_status() {
    let fixture = Fixture::new().await;

    let (status, body) = fixture.json("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = fixture.json("GET", "/deployment", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "idle");
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_commands_in_the_wrong_state_conflict() {
    let fixture = Fixture::new().await;

    let (status, body) = fixture.json("POST", "/deployment/retry", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("cannot retry"));

    let (status, _) = fixture.json("POST", "/deployment/aux/diagnostic", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Nothing to cancel is not an error
    let (status, body) = fixture.json("POST", "/deployment/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No job is executing");
}

#[tokio::test]
async fn test_start_without_configuration_is_not_found() {
    let fixture = Fixture::new().await;
    let (status, _) = fixture.json("POST", "/deployment/start", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_inventory_rendering_and_validation() {
    let fixture = Fixture::new().await;

    let (status, body) = fixture.json("POST", "/inventory/minimal", Some(wizard())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "minimal");
    assert!(body["yaml"].as_str().unwrap().contains("vilanova2"));

    let mut conflicting = wizard();
    conflicting["hosts"][1]["address"] = json!("192.168.1.101");
    let (status, body) = fixture.json("POST", "/inventory/full", Some(conflicting)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["conflicting_hosts"], json!(["vilanova1", "vilanova2"]));

    let (status, _) = fixture.json("POST", "/inventory/partial", Some(wizard())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_saved_configuration_drives_a_deployment() {
    let fixture = Fixture::new().await;

    let (status, body) = fixture.json("POST", "/config", Some(wizard())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["saved"], true);
    let (_, body) = fixture.json("GET", "/config", None).await;
    assert_eq!(body["config"]["hosts"][0]["hostname"], "vilanova1");

    let (status, body) = fixture
        .json(
            "POST",
            "/deployment/start",
            Some(json!({"become_password": "hunter2", "features": {"deploy_harbor": false}})),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["action"], "start");

    let mut rx = fixture.app.deployment.watch();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|state| state.status() == DeploymentStatus::Complete),
    )
    .await
    .unwrap()
    .unwrap();

    let (_, body) = fixture.json("GET", "/deployment", None).await;
    assert_eq!(body["status"], "complete");
    assert_eq!(body["progress_percent"], 100);
    let jobs = body["jobs"].as_array().unwrap();
    assert!(jobs.iter().all(|job| job["id"] != "harbor-deploy"));

    let (status, bytes) = fixture.call("GET", "/deployment/logs", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("Deploy Keycloak"));
    assert!(!text.contains("hunter2"));

    let (status, body) = fixture.json("DELETE", "/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["saved"], false);
}
