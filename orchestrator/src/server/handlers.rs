//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{error, info};

use openapi_server::models::{
    ActionResponse, ConfigResponse, DeploymentStatusResponse, ErrorResponse, HealthResponse,
    InventoryResponse, StartRequest, VersionResponse,
};

use crate::deploy::controller::{Command, DeploymentConfig};
use crate::errors::OrchestratorError;
use crate::inventory::{generate, DetailLevel, WizardState};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error wrapper mapping orchestrator errors onto HTTP statuses
#[derive(Debug)]
pub struct ApiError(pub OrchestratorError);

impl<E: Into<OrchestratorError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestratorError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestratorError::InvalidState(_) => StatusCode::CONFLICT,
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::JsonError(_) | OrchestratorError::ConfigError(_) => {
                StatusCode::BAD_REQUEST
            }
            OrchestratorError::ShutdownError(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        }

        let body = match &self.0 {
            OrchestratorError::Validation(validation) => ErrorResponse {
                error: "invalid configuration".to_string(),
                problems: validation.problems.clone(),
                conflicting_hosts: validation.conflicting_hosts.clone(),
            },
            other => ErrorResponse {
                error: other.to_string(),
                problems: Vec::new(),
                conflicting_hosts: Vec::new(),
            },
        };
        (status, Json(body)).into_response()
    }
}

fn parse_body(body: &Bytes) -> Result<Option<StartRequest>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(body)?))
}

/// Configuration sent with a follow-up command, if any
async fn optional_config(
    state: &ServerState,
    body: &Bytes,
) -> Result<Option<DeploymentConfig>, ApiError> {
    match parse_body(body)? {
        Some(request) => Ok(Some(state.app.deployment_config(request).await?)),
        None => Ok(None),
    }
}

async fn submit(
    state: &ServerState,
    command: Command,
) -> Result<(StatusCode, Json<ActionResponse>), ApiError> {
    let action = command.name();
    let accepted = state.app.deployment.submit(command).await?;
    info!(action, status = %accepted.status, "Command accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(ActionResponse {
            success: true,
            action: action.to_string(),
            status: accepted.status.to_string(),
            message: accepted
                .channel
                .map(|channel| format!("Streaming on /ws/playbook/{}", channel.key())),
        }),
    ))
}

// ------------------------------- GENERAL ---------------------------------- //

pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "thinkube-orchestrator".to_string(),
        version: version.version,
    })
}

pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// ------------------------------ DEPLOYMENT -------------------------------- //

/// Status snapshot; never waits on the controller
pub async fn status_handler(State(state): State<Arc<ServerState>>) -> Json<DeploymentStatusResponse> {
    Json(state.app.deployment.snapshot().to_response())
}

pub async fn start_handler(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request = parse_body(&body)?.unwrap_or_default();
    let config = state.app.deployment_config(request).await?;
    submit(&state, Command::Start(config)).await
}

pub async fn continue_handler(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let config = optional_config(&state, &body).await?;
    submit(&state, Command::Continue(config)).await
}

pub async fn retry_handler(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let config = optional_config(&state, &body).await?;
    submit(&state, Command::Retry(config)).await
}

pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let config = optional_config(&state, &body).await?;
    submit(&state, Command::Rollback(config)).await
}

pub async fn reset_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    submit(&state, Command::Reset).await
}

/// Cancel the executing job. Cancelling when nothing runs is not an error.
pub async fn cancel_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let cancelled = state.app.deployment.cancel();
    Json(ActionResponse {
        success: true,
        action: "cancel".to_string(),
        status: state.app.deployment.snapshot().status().to_string(),
        message: Some(if cancelled {
            "Cancellation requested".to_string()
        } else {
            "No job is executing".to_string()
        }),
    })
}

pub async fn export_logs_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.app.deployment.export_logs(),
    )
}

pub async fn diagnostic_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    submit(&state, Command::Diagnostic).await
}

pub async fn compensate_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    submit(&state, Command::Compensate(job_id)).await
}

// ------------------------------ WIZARD STATE ------------------------------ //

pub async fn get_config_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<ConfigResponse>, ApiError> {
    let wizard = state.app.load_session().await?;
    Ok(Json(ConfigResponse {
        saved: wizard.is_some(),
        config: wizard.map(|w| serde_json::to_value(w)).transpose()?,
    }))
}

pub async fn save_config_handler(
    State(state): State<Arc<ServerState>>,
    Json(value): Json<Value>,
) -> Result<Json<ConfigResponse>, ApiError> {
    let wizard: WizardState = serde_json::from_value(value)?;
    state.app.save_session(&wizard).await?;
    info!(hosts = wizard.hosts.len(), "Saved wizard state");
    Ok(Json(ConfigResponse {
        saved: true,
        config: Some(serde_json::to_value(&wizard)?),
    }))
}

pub async fn clear_config_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<ConfigResponse>, ApiError> {
    state.app.clear_session().await?;
    Ok(Json(ConfigResponse {
        saved: false,
        config: None,
    }))
}

/// Render the inventory for the posted wizard state, or the saved one
pub async fn inventory_handler(
    State(state): State<Arc<ServerState>>,
    Path(mode): Path<String>,
    body: Bytes,
) -> Result<Json<InventoryResponse>, ApiError> {
    let level: DetailLevel = mode.parse().map_err(OrchestratorError::ConfigError)?;
    let wizard: WizardState = if body.iter().all(u8::is_ascii_whitespace) {
        state
            .app
            .load_session()
            .await?
            .ok_or_else(|| OrchestratorError::NotFound("no configuration was sent or saved".to_string()))?
    } else {
        serde_json::from_slice(&body)?
    };

    let document = generate(level, &wizard)?;
    Ok(Json(InventoryResponse {
        mode: level.to_string(),
        yaml: document.to_yaml()?,
    }))
}
