//! Server state

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::app::state::AppState;

/// Server state shared across handlers
pub struct ServerState {
    pub app: Arc<AppState>,

    /// How long a new stream observer has to send its parameters
    pub param_timeout: Duration,

    /// Cancelled when the server starts shutting down
    pub shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(app: Arc<AppState>, param_timeout: Duration) -> Self {
        Self {
            app,
            param_timeout,
            shutdown: CancellationToken::new(),
        }
    }
}
