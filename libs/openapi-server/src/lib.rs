//! Models of the orchestrator's local HTTP API, shared by server and client

pub mod models;
