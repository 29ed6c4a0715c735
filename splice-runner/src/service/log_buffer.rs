//! Log buffer service
//!
//! Manages in-memory log collection for job execution. Steps append to the
//! buffer while they run; the job's flusher drains it on an interval and once
//! more when the job finishes, sending the rendered lines to the queue.

use splice_core::domain::log::LogEntry;
use std::sync::{Arc, Mutex};

/// Service for managing log buffers
pub trait LogBufferService: Send + Sync {
    /// Adds a log entry to the buffer
    ///
    /// # Arguments
    /// * `entry` - The log entry to add
    fn add_entry(&self, entry: LogEntry);

    /// Drains all log entries from the buffer
    ///
    /// # Returns
    /// All entries that were in the buffer, oldest first
    fn drain(&self) -> Vec<LogEntry>;

    /// Drains the buffer into `appendLog` content: one rendered line per
    /// entry, each newline-terminated. Empty when nothing was buffered.
    fn drain_rendered(&self) -> String {
        self.drain()
            .iter()
            .map(|entry| format!("{}\n", entry.render()))
            .collect()
    }
}

/// In-memory implementation of LogBufferService
///
/// Uses Arc<Mutex<Vec<LogEntry>>> for thread-safe access across tasks.
#[derive(Clone)]
pub struct InMemoryLogBuffer {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryLogBuffer {
    /// Creates a new in-memory log buffer
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Default for InMemoryLogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBufferService for InMemoryLogBuffer {
    fn add_entry(&self, entry: LogEntry) {
        // A panic elsewhere must not cost the job its log
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push(entry);
    }

    fn drain(&self) -> Vec<LogEntry> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.drain(..).collect()
    }
}
