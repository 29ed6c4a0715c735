//! Log sinks
//!
//! The engine writes job-visible output (step markers, subprocess output,
//! pull progress) into a `LogSink`. Each front end supplies its own
//! implementation:
//! - Runner: buffered entries flushed to the job queue on an interval
//! - CLI: a per-repository log file
//! - Tests: an in-memory collector

use splice_core::domain::log::{LogEntry, LogLevel};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Trait for log sinks
///
/// Implementations are shared between the step that produces output and the
/// task that flushes it, so they take `&self` and must be thread-safe.
pub trait LogSink: Send + Sync {
    /// Write a log message
    ///
    /// # Arguments
    /// * `level` - The log level (Debug, Info, Warning, Error)
    /// * `message` - One line of output, without trailing newline
    fn write(&self, level: LogLevel, message: &str);

    fn info(&self, message: &str) {
        self.write(LogLevel::Info, message);
    }

    fn warning(&self, message: &str) {
        self.write(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.write(LogLevel::Error, message);
    }
}

/// Sink that discards everything
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&self, _level: LogLevel, _message: &str) {}
}

/// Sink that keeps every entry in memory
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// All messages joined with newlines
    pub fn text(&self) -> String {
        self.entries()
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl LogSink for MemorySink {
    fn write(&self, level: LogLevel, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(LogEntry::new(level, message));
    }
}

/// Forwards to an inner sink while remembering the last `limit` bytes
///
/// Used to attach the tail of a failing step's output to its error without
/// holding the whole output in memory.
pub(crate) struct TailSink<'a> {
    inner: &'a dyn LogSink,
    limit: usize,
    tail: Mutex<(VecDeque<String>, usize)>,
}

impl<'a> TailSink<'a> {
    pub(crate) fn new(inner: &'a dyn LogSink, limit: usize) -> Self {
        Self {
            inner,
            limit,
            tail: Mutex::new((VecDeque::new(), 0)),
        }
    }

    pub(crate) fn tail(&self) -> String {
        let guard = self.tail.lock().unwrap_or_else(|e| e.into_inner());
        guard.0.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

impl LogSink for TailSink<'_> {
    fn write(&self, level: LogLevel, message: &str) {
        self.inner.write(level, message);

        let mut guard = self.tail.lock().unwrap_or_else(|e| e.into_inner());
        let (lines, size) = &mut *guard;
        let line = if message.len() > self.limit {
            crate::error::truncate(message, self.limit)
        } else {
            message.to_string()
        };
        *size += line.len() + 1;
        lines.push_back(line);
        while *size > self.limit + 1 && lines.len() > 1 {
            if let Some(dropped) = lines.pop_front() {
                *size -= dropped.len() + 1;
            }
        }
    }
}
