//! Inventory generation from wizard state

pub mod document;
pub mod generate;
pub mod model;
pub mod validate;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use document::InventoryDocument;
pub use generate::generate;
pub use model::WizardState;

/// How much of the wizard state the inventory carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Addresses and login user only, usable before trust is established
    Minimal,

    /// Roles, network and hardware facts
    #[default]
    Full,
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetailLevel::Minimal => write!(f, "minimal"),
            DetailLevel::Full => write!(f, "full"),
        }
    }
}

impl FromStr for DetailLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minimal" => Ok(DetailLevel::Minimal),
            "full" => Ok(DetailLevel::Full),
            _ => Err(format!("Invalid inventory detail level: {}", s)),
        }
    }
}
