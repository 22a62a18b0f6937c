//! Job descriptors

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::inventory::DetailLevel;

/// Grouping label shown by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initial,
    Infrastructure,
    Networking,
    Kubernetes,
    Core,
    Rollback,
    Test,
    Diagnostic,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Initial => "initial",
            Phase::Infrastructure => "infrastructure",
            Phase::Networking => "networking",
            Phase::Kubernetes => "kubernetes",
            Phase::Core => "core",
            Phase::Rollback => "rollback",
            Phase::Test => "test",
            Phase::Diagnostic => "diagnostic",
        };
        write!(f, "{}", label)
    }
}

/// One unit of external provisioning work. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier within a queue
    pub id: String,

    pub phase: Phase,

    pub title: String,

    /// Playbook path, relative to the playbook root unless absolute
    pub executable: String,

    /// Extra parameters handed to the playbook as variables
    #[serde(default)]
    pub params: BTreeMap<String, Value>,

    /// Inventory variant the playbook runs against
    #[serde(default)]
    pub inventory: DetailLevel,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        phase: Phase,
        title: impl Into<String>,
        executable: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            phase,
            title: title.into(),
            executable: executable.into(),
            params: BTreeMap::new(),
            inventory: DetailLevel::Full,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_inventory(mut self, level: DetailLevel) -> Self {
        self.inventory = level;
        self
    }
}
