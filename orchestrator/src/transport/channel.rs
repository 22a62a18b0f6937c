//! Per-execution event channel
//!
//! Every event is appended to an in-memory log before it is broadcast, under
//! the same lock. A subscriber therefore receives the backlog and then the
//! live tail with no gap and no duplicate, and a late or reconnecting
//! observer can always rebuild the full stream, including the terminal
//! message.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::message::ExecutionEvent;
use crate::utils::lock;

const LIVE_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct EventLog {
    events: Vec<ExecutionEvent>,
    closed: bool,
}

#[derive(Debug)]
pub struct ExecutionChannel {
    key: String,
    log: Mutex<EventLog>,
    live: broadcast::Sender<ExecutionEvent>,
    closed: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl ExecutionChannel {
    /// New open channel addressed by the job's executable reference
    pub fn new(key: impl Into<String>) -> Arc<Self> {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            key: key.into(),
            log: Mutex::new(EventLog::default()),
            live,
            closed,
            cancel: CancellationToken::new(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append an event to the stream.
    ///
    /// Returns the event with its sequence number, or `None` when the stream
    /// was already closed by a terminal event.
    pub fn publish(&self, mut event: ExecutionEvent) -> Option<ExecutionEvent> {
        let terminal = event.is_terminal();
        {
            let mut log = lock(&self.log);
            if log.closed {
                warn!(channel = %self.key, "Dropping event published after stream close");
                return None;
            }
            event.seq = log.events.len() as u64;
            log.events.push(event.clone());
            if terminal {
                log.closed = true;
            }
            // No receivers is fine; the log keeps the event for replay
            let _ = self.live.send(event.clone());
        }
        if terminal {
            debug!(channel = %self.key, "Stream closed");
            self.closed.send_replace(true);
        }
        Some(event)
    }

    /// Backlog so far plus a live tail, taken atomically
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let log = lock(&self.log);
        let backlog: VecDeque<ExecutionEvent> = log.events.iter().cloned().collect();
        let live = if log.closed {
            None
        } else {
            Some(self.live.subscribe())
        };
        Subscription {
            channel: self.clone(),
            next_seq: 0,
            backlog,
            live,
            finished: false,
        }
    }

    /// Events from `seq` onwards
    pub fn events_since(&self, seq: u64) -> Vec<ExecutionEvent> {
        let log = lock(&self.log);
        log.events.iter().skip(seq as usize).cloned().collect()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events_since(0)
    }

    /// Terminal event, once the stream is closed
    pub fn terminal_event(&self) -> Option<ExecutionEvent> {
        let log = lock(&self.log);
        log.events.last().filter(|e| e.is_terminal()).cloned()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once a terminal event has been published
    pub async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as self, so this cannot fail
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Request cancellation of the execution. Idempotent.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(channel = %self.key, "Cancellation requested");
        }
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Replay-then-tail view over a channel
pub struct Subscription {
    channel: Arc<ExecutionChannel>,
    next_seq: u64,
    backlog: VecDeque<ExecutionEvent>,
    live: Option<broadcast::Receiver<ExecutionEvent>>,
    finished: bool,
}

impl Subscription {
    /// Next event in stream order; `None` after the terminal event
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(event) = self.backlog.pop_front() {
                if event.seq < self.next_seq {
                    continue;
                }
                return Some(self.deliver(event));
            }

            let live = self.live.as_mut()?;
            match live.recv().await {
                Ok(event) if event.seq < self.next_seq => continue,
                Ok(event) => return Some(self.deliver(event)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(
                        channel = %self.channel.key(),
                        skipped,
                        "Subscriber lagged, recovering from the event log"
                    );
                    self.backlog = self.channel.events_since(self.next_seq).into();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.backlog = self.channel.events_since(self.next_seq).into();
                    if self.backlog.is_empty() {
                        return None;
                    }
                    self.live = None;
                }
            }
        }
    }

    fn deliver(&mut self, event: ExecutionEvent) -> ExecutionEvent {
        self.next_seq = event.seq + 1;
        if event.is_terminal() {
            self.finished = true;
        }
        event
    }
}
