//! HTTP client for the local API

pub mod client;
