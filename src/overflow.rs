//! Persistence strategies for lines that could not be delivered.
//!
//! When the message queue exceeds its byte budget, or the client shuts down
//! with lines still pending, the queue snapshot is handed to an
//! [`OverflowSink`]. The default [`FileOverflowSink`] appends the lines to an
//! hourly file so at most one file is produced per wall-clock hour.

use std::{
    fmt,
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

use chrono::{DateTime, Utc};

use crate::console::SharedConsole;

/// Receives queue snapshots that must be persisted elsewhere.
///
/// Implementations are called synchronously from the send path and from
/// shutdown, so they should finish quickly. An empty snapshot must be a
/// no-op.
///
/// The client's internal lock is held during the call. Calling back into
/// the same [`SyslogClient`](crate::SyslogClient) from `spill` deadlocks.
pub trait OverflowSink: Send + Sync {
    fn spill(&self, lines: &[String]) -> io::Result<()>;
}

impl<F> OverflowSink for F
where
    F: Fn(&[String]) -> io::Result<()> + Send + Sync,
{
    fn spill(&self, lines: &[String]) -> io::Result<()> {
        self(lines)
    }
}

/// Called with whatever is still queued when the client shuts down.
///
/// Runs under the client's internal lock; it must not call back into the
/// client.
pub trait ExitHook: Send + Sync {
    fn on_exit(&self, pending: &[String]);
}

/// Default exit hook: forward the pending lines to an overflow sink.
pub struct SpillOnExit {
    sink: Arc<dyn OverflowSink>,
}

impl SpillOnExit {
    pub fn new(sink: Arc<dyn OverflowSink>) -> Self {
        Self { sink }
    }
}

impl ExitHook for SpillOnExit {
    fn on_exit(&self, pending: &[String]) {
        if let Err(err) = self.sink.spill(pending) {
            log::warn!("syslog client failed to persist {} lines on exit: {err}", pending.len());
        }
    }
}

impl fmt::Debug for SpillOnExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpillOnExit(<dyn OverflowSink>)")
    }
}

/// Appends spilled lines to `<dir>/<prefix><YYYY-MM-DDTHH>.log`.
pub struct FileOverflowSink {
    directory: Option<PathBuf>,
    prefix: String,
    console: Option<SharedConsole>,
}

impl FileOverflowSink {
    /// Write files named `<prefix><hour>.log` into the working directory.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            directory: None,
            prefix: prefix.into(),
            console: None,
        }
    }

    /// Place the files under `directory` instead of the working directory.
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Announce every spill on `console`.
    pub fn with_console(mut self, console: SharedConsole) -> Self {
        self.console = Some(console);
        self
    }

    /// File name used for spills happening at `now`, e.g.
    /// `app-2019-09-23T11.log`.
    pub fn file_name_at(&self, now: DateTime<Utc>) -> String {
        format!("{}{}.log", self.prefix, now.format("%Y-%m-%dT%H"))
    }

    /// Path of the file for `now`; relative to the working directory unless
    /// a directory was configured.
    pub fn path_at(&self, now: DateTime<Utc>) -> PathBuf {
        let name = self.file_name_at(now);
        match &self.directory {
            Some(directory) => directory.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Append `lines` to the file for `now`.
    pub fn spill_at(&self, lines: &[String], now: DateTime<Utc>) -> io::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let path = self.path_at(now);
        let mut content = lines.join("\n");
        content.push('\n');
        if let Some(console) = &self.console {
            console.print(&format!(
                "[syslog] writing {} enqueued lines ({} bytes) to {}",
                lines.len(),
                content.len(),
                path.display()
            ));
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(content.as_bytes())?;
        file.flush()
    }
}

impl OverflowSink for FileOverflowSink {
    fn spill(&self, lines: &[String]) -> io::Result<()> {
        self.spill_at(lines, Utc::now())
    }
}

impl fmt::Debug for FileOverflowSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileOverflowSink")
            .field("directory", &self.directory)
            .field("prefix", &self.prefix)
            .finish()
    }
}
