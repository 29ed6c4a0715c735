//! Subprocess helpers
//!
//! Shared by command steps, the container CLI driver, archive extraction and
//! the diff tool.

use crate::sink::LogSink;
use splice_core::domain::log::LogLevel;
use std::process::{Output, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};

/// Longest line forwarded as one log entry; longer lines are split
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Output of a finished subprocess whose streams were captured in memory
#[derive(Debug)]
pub(crate) struct Captured {
    pub status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    /// stdout and stderr joined, trimmed
    pub fn combined(&self) -> String {
        let mut text = self.stdout.trim().to_string();
        let err = self.stderr.trim();
        if !err.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(err);
        }
        text
    }
}

impl From<Output> for Captured {
    fn from(output: Output) -> Self {
        Self {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Runs `command` to completion with both streams captured as text
///
/// Invalid UTF-8 is replaced; callers that must keep the exact bytes use
/// [`capture_raw`].
pub(crate) async fn capture(command: &mut Command) -> std::io::Result<Captured> {
    capture_raw(command).await.map(Captured::from)
}

/// Runs `command` to completion with both streams captured as bytes
pub(crate) async fn capture_raw(command: &mut Command) -> std::io::Result<Output> {
    command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
}

/// Spawns `command` with stdin closed and stdout/stderr piped
pub(crate) fn spawn_piped(command: &mut Command) -> std::io::Result<Child> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

/// Forwards both output streams of `child` into `sink` line by line until
/// both reach EOF
///
/// stdout lines are written at Info, stderr lines at Warning. Interleaving
/// across the two streams follows arrival order. Lines longer than
/// `MAX_LINE_BYTES` arrive as several entries.
pub(crate) async fn pump_output(child: &mut Child, sink: &dyn LogSink) -> std::io::Result<()> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    tokio::try_join!(
        forward_lines(stdout, sink, LogLevel::Info),
        forward_lines(stderr, sink, LogLevel::Warning),
    )?;
    Ok(())
}

async fn forward_lines<R>(
    stream: Option<R>,
    sink: &dyn LogSink,
    level: LogLevel,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return Ok(());
    };

    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        sink.write(level, line.trim_end_matches(['\n', '\r']));
    }
}
