//! Persisted deployment snapshot and failure logs

use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info};

use crate::deploy::result::ExecutionResult;
use crate::deploy::state::DeploymentState;
use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::utils::{file_timestamp, sanitize_file_name};

/// Where the controller keeps what must survive a restart
#[derive(Debug, Clone)]
pub struct DeploymentStore {
    state_file: File,
    failures_dir: Dir,
}

impl DeploymentStore {
    pub fn new(state_file: File, failures_dir: Dir) -> Self {
        Self {
            state_file,
            failures_dir,
        }
    }

    /// Load the last saved snapshot, if any
    pub async fn load(&self) -> Result<Option<DeploymentState>, OrchestratorError> {
        let state: Option<DeploymentState> = self.state_file.read_json_opt().await?;
        if let Some(state) = &state {
            info!(
                deployment = %state.deployment_id,
                status = %state.status(),
                cursor = state.cursor(),
                "Loaded deployment snapshot"
            );
        }
        Ok(state)
    }

    pub async fn save(&self, state: &DeploymentState) -> Result<(), OrchestratorError> {
        debug!(status = %state.status(), cursor = state.cursor(), "Saving deployment snapshot");
        self.state_file.write_json(state).await
    }

    /// Write the captured log of a job that did not succeed
    pub async fn write_failure_log(
        &self,
        title: &str,
        result: &ExecutionResult,
    ) -> Result<PathBuf, OrchestratorError> {
        self.failures_dir.create().await?;
        let name = format!(
            "{}_{}.log",
            file_timestamp(Utc::now()),
            sanitize_file_name(&result.job_id)
        );
        let file = self.failures_dir.file(&name);

        let mut contents = format!(
            "Job: {} ({})\nStatus: {}\nCompleted: {}\n",
            title,
            result.job_id,
            result.status,
            result.completed_at.to_rfc3339()
        );
        if let Some(code) = result.return_code {
            contents.push_str(&format!("Return code: {}\n", code));
        }
        if let Some(reason) = &result.reason {
            contents.push_str(&format!("Reason: {}\n", reason));
        }
        contents.push('\n');
        contents.push_str(&result.log);

        file.write_string(&contents).await?;
        info!(job = %result.job_id, path = %file.path().display(), "Wrote failure log");
        Ok(file.path().to_path_buf())
    }
}
