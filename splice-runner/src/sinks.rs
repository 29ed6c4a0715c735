//! Engine log sink for the runner
//!
//! Connects the engine's job-visible output to the runner's log buffer, so
//! everything a step prints is collected and streamed to the queue.

use splice_core::domain::log::{LogEntry, LogLevel};
use splice_engine::LogSink;
use std::sync::Arc;

use crate::service::LogBufferService;

/// Buffered log sink that writes to a LogBufferService
pub struct BufferedLogSink {
    buffer: Arc<dyn LogBufferService>,
}

impl BufferedLogSink {
    /// Creates a new buffered log sink
    ///
    /// # Arguments
    /// * `buffer` - The log buffer service to write to
    pub fn new(buffer: Arc<dyn LogBufferService>) -> Self {
        Self { buffer }
    }
}

impl LogSink for BufferedLogSink {
    fn write(&self, level: LogLevel, message: &str) {
        self.buffer.add_entry(LogEntry::new(level, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::InMemoryLogBuffer;

    #[test]
    fn test_writes_reach_buffer() {
        let buffer = InMemoryLogBuffer::new();
        let sink = BufferedLogSink::new(Arc::new(buffer.clone()));
        sink.info("hello");
        sink.error("boom");

        let entries = buffer.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].level, LogLevel::Error);
        assert_eq!(entries[1].message, "boom");
    }
}
