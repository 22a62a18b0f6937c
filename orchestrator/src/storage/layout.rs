//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::storage::deployment::DeploymentStore;

/// Everything the orchestrator keeps on disk, under one base directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Saved wizard state
    pub fn session_config_file(&self) -> File {
        File::new(self.base_dir.join("session-config.json"))
    }

    pub fn deployment_state_file(&self) -> File {
        File::new(self.base_dir.join("deployment-state.json"))
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    pub fn failures_dir(&self) -> Dir {
        self.logs_dir().subdir("failures")
    }

    /// Per-execution inventory and vars files
    pub fn work_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("work"))
    }

    pub fn deployment_store(&self) -> DeploymentStore {
        DeploymentStore::new(self.deployment_state_file(), self.failures_dir())
    }

    /// Create the directories
    pub async fn setup(&self) -> Result<(), OrchestratorError> {
        Dir::new(self.base_dir.clone()).create().await?;
        self.logs_dir().create().await?;
        self.failures_dir().create().await?;
        self.work_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(".thinkube-installer"))
    }
}
