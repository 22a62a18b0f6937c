//! Deployment Orchestrator Library
//!
//! Inventory generation, playbook execution, log streaming and the
//! deployment queue behind the cluster installer.

pub mod app;
pub mod deploy;
pub mod engine;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod inventory;
pub mod logs;
pub mod server;
pub mod storage;
pub mod transport;
pub mod utils;
pub mod workers;
