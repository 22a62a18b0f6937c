//! Deployment worker: serializes controller commands

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::deploy::controller::{Accepted, Command, DeploymentController};
use crate::deploy::export;
use crate::deploy::state::DeploymentState;
use crate::errors::OrchestratorError;
use crate::transport::registry::TransportRegistry;

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Pending commands before senders wait
    pub command_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            command_capacity: 16,
        }
    }
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<Accepted, OrchestratorError>>,
}

/// Cloneable entry point to the deployment worker
#[derive(Clone)]
pub struct DeploymentHandle {
    commands: mpsc::Sender<Request>,
    state: watch::Receiver<Arc<DeploymentState>>,
    transport: Arc<TransportRegistry>,
}

impl DeploymentHandle {
    /// Submit a command. Resolves as soon as the command is accepted or
    /// rejected, not when its jobs finish.
    pub async fn submit(&self, command: Command) -> Result<Accepted, OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| OrchestratorError::ShutdownError("deployment worker stopped".to_string()))?;
        rx.await
            .map_err(|_| OrchestratorError::ShutdownError("deployment worker stopped".to_string()))?
    }

    /// Latest published state
    pub fn snapshot(&self) -> Arc<DeploymentState> {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<DeploymentState>> {
        self.state.clone()
    }

    /// Cancel the executing job. Idempotent.
    pub fn cancel(&self) -> bool {
        self.transport.cancel_active()
    }

    pub fn export_logs(&self) -> String {
        export::render(&self.snapshot(), chrono::Utc::now())
    }

    pub fn transport(&self) -> Arc<TransportRegistry> {
        self.transport.clone()
    }
}

/// Create the handle and the receiving end the worker runs on
pub fn channel(options: &Options, controller: &DeploymentController) -> (DeploymentHandle, Commands) {
    let (tx, rx) = mpsc::channel(options.command_capacity.max(1));
    (
        DeploymentHandle {
            commands: tx,
            state: controller.subscribe(),
            transport: controller.transport(),
        },
        Commands { rx },
    )
}

pub struct Commands {
    rx: mpsc::Receiver<Request>,
}

/// Run the deployer worker until shutdown.
///
/// One command is performed at a time. Commands arriving while jobs execute
/// are rejected; on shutdown the executing job is cancelled and its result
/// recorded before the worker returns.
pub async fn run(
    mut controller: DeploymentController,
    mut commands: Commands,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Deployer worker starting...");

    loop {
        let request = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Deployer worker shutting down...");
                return;
            }
            request = commands.rx.recv() => match request {
                Some(request) => request,
                None => {
                    info!("Deployer worker command channel closed");
                    return;
                }
            },
        };

        let work = match controller.begin(request.command) {
            Ok((accepted, work)) => {
                let _ = request.reply.send(Ok(accepted));
                work
            }
            Err(e) => {
                debug!("Command rejected: {}", e);
                let _ = request.reply.send(Err(e));
                continue;
            }
        };

        let stop = controller.stop_token();
        let transport = controller.transport();
        let perform = controller.perform(work);
        tokio::pin!(perform);

        let mut shutting_down = false;
        let mut open = true;
        loop {
            tokio::select! {
                _ = &mut perform => break,
                _ = &mut shutdown_signal, if !shutting_down => {
                    info!("Shutdown requested while jobs execute, cancelling...");
                    shutting_down = true;
                    stop.cancel();
                    transport.cancel_active();
                }
                request = commands.rx.recv(), if open && !shutting_down => match request {
                    Some(request) => {
                        warn!(command = request.command.name(), "Rejecting command while a job executes");
                        let _ = request.reply.send(Err(OrchestratorError::InvalidState(
                            "a job is currently executing".to_string(),
                        )));
                    }
                    None => open = false,
                },
            }
        }

        if shutting_down {
            info!("Deployer worker shut down");
            return;
        }
    }
}
