//! Streaming transport between the execution engine and observers

pub mod channel;
pub mod message;
pub mod registry;
