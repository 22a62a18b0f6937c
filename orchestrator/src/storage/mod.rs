//! On-disk storage

pub mod deployment;
pub mod layout;
pub mod settings;
