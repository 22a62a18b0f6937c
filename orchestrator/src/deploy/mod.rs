//! Deployment module

pub mod builder;
pub mod catalog;
pub mod controller;
pub mod export;
pub mod fsm;
pub mod job;
pub mod queue;
pub mod result;
pub mod rollback;
pub mod state;

pub use controller::{Accepted, AdHocRun, Command, DeploymentConfig, DeploymentController};
