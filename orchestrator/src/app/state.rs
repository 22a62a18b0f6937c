//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use openapi_server::models::StartRequest;

use crate::app::options::{AppOptions, QueueOptions};
use crate::deploy::controller::{DeploymentConfig, DeploymentController};
use crate::engine::{ExecutionEnvironment, PlaybookRunner};
use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::inventory::WizardState;
use crate::storage::layout::StorageLayout;
use crate::transport::registry::TransportRegistry;
use crate::workers::deployer::{self, Commands, DeploymentHandle};

/// Main application state
pub struct AppState {
    pub layout: StorageLayout,

    /// Saved wizard state
    pub session_file: Arc<File>,

    pub deployment: DeploymentHandle,

    pub queue: QueueOptions,
}

impl AppState {
    /// Initialize application state.
    ///
    /// Returns the controller and its command queue for the deployer worker.
    pub async fn init(
        options: &AppOptions,
        runner: Arc<dyn PlaybookRunner>,
    ) -> Result<(Self, DeploymentController, Commands), OrchestratorError> {
        info!("Initializing application state...");

        let layout = options.storage.layout.clone();
        layout.setup().await?;

        let transport = Arc::new(TransportRegistry::new());
        let mut controller =
            DeploymentController::new(runner, transport, layout.deployment_store());
        match controller.restore().await {
            Ok(true) => info!(
                status = %controller.state().status(),
                "Restored the previous deployment"
            ),
            Ok(false) => {}
            Err(e) => warn!("Ignoring unreadable deployment snapshot: {}", e),
        }

        let (deployment, commands) = deployer::channel(&options.deployer, &controller);
        let state = Self {
            session_file: Arc::new(layout.session_config_file()),
            layout,
            deployment,
            queue: options.queue,
        };
        Ok((state, controller, commands))
    }

    pub async fn load_session(&self) -> Result<Option<WizardState>, OrchestratorError> {
        self.session_file.read_json_opt().await
    }

    pub async fn save_session(&self, wizard: &WizardState) -> Result<(), OrchestratorError> {
        self.session_file.write_json(wizard).await
    }

    pub async fn clear_session(&self) -> Result<(), OrchestratorError> {
        self.session_file.delete().await
    }

    /// Wizard state from the request, or the saved one
    pub async fn resolve_wizard(
        &self,
        request: &StartRequest,
    ) -> Result<WizardState, OrchestratorError> {
        match &request.config {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => self.load_session().await?.ok_or_else(|| {
                OrchestratorError::NotFound("no configuration was sent or saved".to_string())
            }),
        }
    }

    /// Assemble a deployment configuration from a request and the defaults
    pub async fn deployment_config(
        &self,
        request: StartRequest,
    ) -> Result<DeploymentConfig, OrchestratorError> {
        let wizard = self.resolve_wizard(&request).await?;
        let features = match &request.features {
            Some(selection) => self.queue.features.with_selection(selection),
            None => self.queue.features,
        };

        let mut environment = ExecutionEnvironment::from_map(request.environment);
        if let Some(password) = request.become_password {
            environment = environment.with_become_password(password);
        }
        if let Some(password) = request.ssh_password {
            environment = environment.with_ssh_password(password);
        }

        Ok(DeploymentConfig {
            wizard,
            features,
            manual: request.manual.unwrap_or(self.queue.manual),
            environment,
        })
    }
}
