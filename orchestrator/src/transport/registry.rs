//! Lookup of execution channels by job address

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::transport::channel::ExecutionChannel;
use crate::utils::lock;

/// Channels addressed by executable reference.
///
/// Opening a channel for an address replaces the previous one, so a retried
/// job streams on a fresh channel while older observers still hold the old
/// one to the end.
#[derive(Debug, Default)]
pub struct TransportRegistry {
    channels: Mutex<HashMap<String, Arc<ExecutionChannel>>>,
    active: Mutex<Option<Arc<ExecutionChannel>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh channel and mark it as the one currently executing
    pub fn open(&self, key: &str) -> Arc<ExecutionChannel> {
        let channel = ExecutionChannel::new(key);
        lock(&self.channels).insert(key.to_string(), channel.clone());
        *lock(&self.active) = Some(channel.clone());
        channel
    }

    /// Latest channel for the address
    pub fn get(&self, key: &str) -> Option<Arc<ExecutionChannel>> {
        lock(&self.channels).get(key).cloned()
    }

    /// Channel of the execution still in progress, if any
    pub fn active(&self) -> Option<Arc<ExecutionChannel>> {
        lock(&self.active)
            .as_ref()
            .filter(|channel| !channel.is_closed())
            .cloned()
    }

    /// Cancel whatever is executing. Returns false when nothing was running.
    pub fn cancel_active(&self) -> bool {
        match self.active() {
            Some(channel) => {
                info!(channel = %channel.key(), "Cancelling active execution");
                channel.cancel();
                true
            }
            None => false,
        }
    }

    /// Clear the active marker once the channel's execution has ended
    pub fn release(&self, channel: &Arc<ExecutionChannel>) {
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|a| Arc::ptr_eq(a, channel)) {
            *active = None;
        }
    }

    /// Forget every channel, e.g. when a new deployment starts
    pub fn clear(&self) {
        lock(&self.channels).clear();
    }
}
