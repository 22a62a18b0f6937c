//! Playbook execution engine

pub mod classify;
pub mod environment;
pub mod lines;
pub mod runner;

pub use environment::ExecutionEnvironment;
pub use runner::{AnsibleRunner, ExecutionRequest, PlaybookRunner, RunnerOptions};
