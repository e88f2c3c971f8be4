//! Status event history served to polling front-ends.

use corefleet_core::NodeStatusEvent;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::debug;

/// Bounded buffer of status events not yet fetched.
#[derive(Debug)]
pub struct EventLog {
    events: Mutex<VecDeque<NodeStatusEvent>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn push(&self, event: NodeStatusEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        while events.len() >= self.capacity.max(1) {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn drain(&self) -> Vec<NodeStatusEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}

/// Move events from the orchestrator's channel into the log.
pub fn spawn_collector(
    mut receiver: UnboundedReceiver<NodeStatusEvent>,
    log: Arc<EventLog>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            debug!(
                "Status event: {} running={} port={}",
                event.index_id, event.running, event.port
            );
            log.push(event);
        }
    })
}
