//! Wire messages of the playbook stream

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deploy::result::ExecutionStatus;

/// Type tag of a stream message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Play,
    Task,
    Ok,
    Changed,
    Failed,
    Skipped,
    /// Unclassified output line, forwarded verbatim
    Output,
    Complete,
    Error,
}

impl EventKind {
    /// Whether this message closes the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Complete | EventKind::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Play => "play",
            EventKind::Task => "task",
            EventKind::Ok => "ok",
            EventKind::Changed => "changed",
            EventKind::Failed => "failed",
            EventKind::Skipped => "skipped",
            EventKind::Output => "output",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
        }
    }
}

/// One structured message describing progress of a running job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_number: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook: Option<String>,

    /// Position in the stream, assigned by the channel
    #[serde(default)]
    pub seq: u64,
}

impl ExecutionEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            task_name: None,
            task_number: None,
            status: None,
            return_code: None,
            playbook: None,
            seq: 0,
        }
    }

    pub fn start(playbook: &str) -> Self {
        let mut event = Self::new(EventKind::Start, "Starting playbook execution");
        event.playbook = Some(playbook.to_string());
        event
    }

    pub fn complete(return_code: i32) -> Self {
        let mut event = Self::new(EventKind::Complete, "Playbook completed successfully");
        event.status = Some(ExecutionStatus::Success);
        event.return_code = Some(return_code);
        event
    }

    pub fn error(status: ExecutionStatus, message: impl Into<String>, return_code: Option<i32>) -> Self {
        let mut event = Self::new(EventKind::Error, message);
        event.status = Some(status);
        event.return_code = return_code;
        event
    }

    /// Error message for a stream that never reached execution
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::error(ExecutionStatus::Failed, message, None)
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// Parameters an observer may send to start an ad hoc run
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionParams {
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default)]
    pub extra_vars: BTreeMap<String, Value>,

    /// Inventory YAML to run against; the generated full inventory otherwise
    #[serde(default)]
    pub inventory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Cancel,
}

/// Anything an observer may send over the stream
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Control(ControlMessage),
    Params(ExecutionParams),
}
