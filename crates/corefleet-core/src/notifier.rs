//! Node status broadcasting.
//!
//! Observers are invoked synchronously on the task that performed the
//! transition, after the registry change is visible. They must not block;
//! consumers that need to do real work should subscribe a [`ChannelObserver`]
//! and handle events on their own task.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// A running/stopped transition. `port` is 0 when `running` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusEvent {
    pub index_id: String,
    pub running: bool,
    pub port: u16,
}

impl NodeStatusEvent {
    pub fn started(index_id: impl Into<String>, port: u16) -> Self {
        Self {
            index_id: index_id.into(),
            running: true,
            port,
        }
    }

    pub fn stopped(index_id: impl Into<String>) -> Self {
        Self {
            index_id: index_id.into(),
            running: false,
            port: 0,
        }
    }
}

/// Receives status events.
pub trait StatusObserver: Send + Sync {
    fn on_status(&self, event: &NodeStatusEvent);
}

impl<F> StatusObserver for F
where
    F: Fn(&NodeStatusEvent) + Send + Sync,
{
    fn on_status(&self, event: &NodeStatusEvent) {
        self(event)
    }
}

/// Handle returned by [`StatusNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    observers: Vec<(SubscriptionId, Arc<dyn StatusObserver>)>,
}

/// Observer list with explicit subscribe/unsubscribe.
#[derive(Default)]
pub struct StatusNotifier {
    subscribers: RwLock<Subscribers>,
}

impl std::fmt::Debug for StatusNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusNotifier")
            .field("observers", &self.len())
            .finish()
    }
}

impl StatusNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn StatusObserver>) -> SubscriptionId {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.next_id += 1;
        let id = SubscriptionId(subscribers.next_id);
        subscribers.observers.push((id, observer));
        id
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.observers.len();
        subscribers.observers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .observers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn publish(&self, event: NodeStatusEvent) {
        // Snapshot so observers may (un)subscribe from inside the callback.
        let observers: Vec<Arc<dyn StatusObserver>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        debug!(
            "Node {} status: running={} port={} ({} observers)",
            event.index_id,
            event.running,
            event.port,
            observers.len()
        );
        for observer in observers {
            observer.on_status(&event);
        }
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<NodeStatusEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NodeStatusEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl StatusObserver for ChannelObserver {
    fn on_status(&self, event: &NodeStatusEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.sender.send(event.clone());
    }
}
