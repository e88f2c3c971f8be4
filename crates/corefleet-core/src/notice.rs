//! User-facing messages.
//!
//! Every outcome the orchestrator reports ("Started node ...", "Port N is
//! already in use by another node") goes through a [`NoticeSink`] handed to it
//! at construction. `notify = true` marks messages worth a pop-up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Destination for user-facing messages.
pub trait NoticeSink: Send + Sync {
    fn notice(&self, notify: bool, message: &str);
}

/// A queued message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub message: String,
    pub notify: bool,
    pub at: DateTime<Utc>,
}

/// Writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNoticeSink;

impl NoticeSink for LogNoticeSink {
    fn notice(&self, notify: bool, message: &str) {
        if notify {
            warn!("{}", message);
        } else {
            info!("{}", message);
        }
    }
}

/// Bounded queue drained by a front-end. Oldest entries are dropped first.
#[derive(Debug)]
pub struct QueueNoticeSink {
    queue: Mutex<VecDeque<Notice>>,
    capacity: usize,
}

impl QueueNoticeSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Take every queued notice.
    pub fn drain(&self) -> Vec<Notice> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NoticeSink for QueueNoticeSink {
    fn notice(&self, notify: bool, message: &str) {
        LogNoticeSink.notice(notify, message);
        if self.capacity == 0 {
            return;
        }

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        while queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(Notice {
            message: message.to_string(),
            notify,
            at: Utc::now(),
        });
    }
}
