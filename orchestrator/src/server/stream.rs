//! WebSocket streaming of playbook executions
//!
//! An observer connects to `/ws/playbook/{job}` where `job` is a playbook
//! alias or a path under `ansible/`. If an execution for that playbook
//! exists, the observer receives its log so far and then the live tail.
//! Otherwise (or with `?run=true`) it has a bounded time to send execution
//! parameters, which start an ad hoc run.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::deploy::catalog;
use crate::deploy::controller::{AdHocRun, Command};
use crate::engine::ExecutionEnvironment;
use crate::inventory::generate;
use crate::server::state::ServerState;
use crate::transport::channel::ExecutionChannel;
use crate::transport::message::{ClientMessage, ControlMessage, ExecutionEvent, ExecutionParams};

const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Always start a new run instead of attaching to an existing one
    #[serde(default)]
    pub run: bool,
}

pub async fn playbook_stream_handler(
    ws: WebSocketUpgrade,
    Path(job): Path<String>,
    Query(query): Query<StreamQuery>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    ws.on_upgrade(move |socket| stream_session(socket, job, query, state))
}

async fn stream_session(
    mut socket: WebSocket,
    name: String,
    query: StreamQuery,
    state: Arc<ServerState>,
) {
    let executable = match catalog::resolve_playbook(name.trim_start_matches('/')) {
        Ok(executable) => executable,
        Err(reason) => {
            warn!("Rejecting stream for {}: {}", name, reason);
            let _ = send_event(&mut socket, &ExecutionEvent::rejected(reason)).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let transport = state.app.deployment.transport();
    let existing = if query.run {
        None
    } else {
        transport.get(&executable)
    };

    let channel = match existing {
        Some(channel) => channel,
        None => match handshake(&mut socket, &state, &executable, !query.run).await {
            Some(channel) => channel,
            None => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        },
    };

    forward(socket, channel, &state).await;
}

/// Wait for execution parameters, or for the playbook to start on its own
async fn handshake(
    socket: &mut WebSocket,
    state: &ServerState,
    executable: &str,
    attach: bool,
) -> Option<Arc<ExecutionChannel>> {
    let transport = state.app.deployment.transport();
    let deadline = tokio::time::sleep(state.param_timeout);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(ATTACH_POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                debug!(playbook = executable, "No execution parameters received");
                let event = ExecutionEvent::rejected(format!(
                    "Timed out waiting for execution parameters after {}s",
                    state.param_timeout.as_secs()
                ));
                let _ = send_event(socket, &event).await;
                return None;
            }
            _ = state.shutdown.cancelled() => return None,
            _ = poll.tick(), if attach => {
                if let Some(channel) = transport.get(executable) {
                    return Some(channel);
                }
            }
            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Params(params)) => {
                            return start_ad_hoc(socket, state, executable, params).await;
                        }
                        Ok(ClientMessage::Control(ControlMessage::Cancel)) => {
                            debug!(playbook = executable, "Cancel before start ignored");
                        }
                        Err(e) => {
                            let event = ExecutionEvent::rejected(format!("Invalid parameters: {}", e));
                            let _ = send_event(socket, &event).await;
                            return None;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn start_ad_hoc(
    socket: &mut WebSocket,
    state: &ServerState,
    executable: &str,
    params: ExecutionParams,
) -> Option<Arc<ExecutionChannel>> {
    let mut job = catalog::job_for_executable(executable);
    job.params.extend(params.extra_vars);

    let inventory = match params.inventory {
        Some(inventory) => Some(inventory),
        None => match state.app.load_session().await {
            Ok(Some(wizard)) => match generate(job.inventory, &wizard) {
                Ok(document) => document.to_yaml().ok(),
                Err(e) => {
                    let _ = send_event(socket, &ExecutionEvent::rejected(e.to_string())).await;
                    return None;
                }
            },
            _ => None,
        },
    };

    let command = Command::AdHoc(AdHocRun {
        job,
        environment: ExecutionEnvironment::from_map(params.environment),
        inventory,
    });
    match state.app.deployment.submit(command).await {
        Ok(accepted) => {
            if accepted.channel.is_none() {
                warn!(playbook = executable, "Ad hoc run accepted without a stream");
            }
            accepted.channel
        }
        Err(e) => {
            info!(playbook = executable, "Ad hoc run rejected: {}", e);
            let _ = send_event(socket, &ExecutionEvent::rejected(e.to_string())).await;
            None
        }
    }
}

/// Replay the channel and tail it until its terminal event.
///
/// A disconnecting observer never stops the execution; only an explicit
/// cancel message does.
async fn forward(socket: WebSocket, channel: Arc<ExecutionChannel>, state: &ServerState) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = channel.subscribe();

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) => {
                    let terminal = event.is_terminal();
                    if let Err(e) = send_split(&mut sender, &event).await {
                        debug!(channel = channel.key(), "Observer gone: {}", e);
                        return;
                    }
                    if terminal {
                        break;
                    }
                }
                None => break,
            },
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(ClientMessage::Control(ControlMessage::Cancel)) =
                        serde_json::from_str::<ClientMessage>(text.as_str())
                    {
                        info!(channel = channel.key(), "Cancel requested by observer");
                        channel.cancel();
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!(channel = channel.key(), "Observer disconnected");
                    return;
                }
                Some(Ok(_)) => {}
            },
            _ = state.shutdown.cancelled() => break,
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

async fn send_event(socket: &mut WebSocket, event: &ExecutionEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!("Failed to encode event: {}", e);
            Ok(())
        }
    }
}

async fn send_split(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ExecutionEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!("Failed to encode event: {}", e);
            Ok(())
        }
    }
}
