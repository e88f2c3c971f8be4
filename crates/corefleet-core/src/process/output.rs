//! Core output capture.
//!
//! Cores are chatty and we never want a full pipe to stall them, so both
//! streams are drained continuously. Lines go to `tracing` at debug level and
//! the most recent ones are kept for failure messages.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Bounded buffer holding the last lines a core printed.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// The buffered lines joined for inclusion in an error message.
    pub fn render(&self) -> String {
        self.snapshot().join("\n")
    }
}

/// Spawn a task that forwards every line of `stream` to the log and the tail.
pub fn drain_lines<R>(
    index_id: String,
    stream_name: &'static str,
    stream: R,
    tail: OutputTail,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream).lines();
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    debug!("[{}] {}: {}", index_id, stream_name, line);
                    tail.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("[{}] Error reading core {}: {}", index_id, stream_name, e);
                    break;
                }
            }
        }
    })
}
