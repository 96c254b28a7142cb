//! Console sink for user-facing diagnostics.
//!
//! The client reports connection changes and undeliverable lines to a
//! console. Applications can redirect that output by supplying their own
//! [`ConsoleSink`].

use std::{fmt, io::Write, sync::Arc};

use crate::client::ConnectionState;

/// Destination for console diagnostics and echoed lines.
///
/// `print` runs while the client's internal lock is held, including from
/// inside [`SyslogClient::log`](crate::SyslogClient::log). Implementations
/// must not log through the same client, or they deadlock.
pub trait ConsoleSink: Send + Sync {
    /// Print one line of text.
    fn print(&self, line: &str);
}

impl<F> ConsoleSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn print(&self, line: &str) {
        self(line)
    }
}

/// Console sink writing to standard output.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutConsole;

impl ConsoleSink for StdoutConsole {
    fn print(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{line}");
    }
}

/// Shared console sink trait object.
#[derive(Clone)]
pub struct SharedConsole {
    inner: Arc<dyn ConsoleSink>,
}

impl SharedConsole {
    pub fn new<C>(console: C) -> Self
    where
        C: ConsoleSink + 'static,
    {
        Self {
            inner: Arc::new(console),
        }
    }

    pub fn print(&self, line: &str) {
        self.inner.print(line);
    }
}

impl Default for SharedConsole {
    fn default() -> Self {
        Self::new(StdoutConsole)
    }
}

impl fmt::Debug for SharedConsole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedConsole(<dyn ConsoleSink>)")
    }
}

/// Verbosity-aware wrapper used by the client core.
#[derive(Clone, Debug)]
pub(crate) struct Diagnostics {
    console: SharedConsole,
    quiet: bool,
    debug: bool,
}

impl Diagnostics {
    pub(crate) fn new(console: SharedConsole, quiet: bool, debug: bool) -> Self {
        Self {
            console,
            quiet,
            debug,
        }
    }

    /// Print a normal `[syslog]` diagnostic unless quiet.
    pub(crate) fn notice(&self, message: impl FnOnce() -> String) {
        if !self.quiet {
            self.console.print(&format!("[syslog] {}", message()));
        }
    }

    /// Print a state-annotated line when debug output is enabled.
    pub(crate) fn debug(&self, state: ConnectionState, message: &str) {
        log::debug!("syslog client ({state}): {message}");
        if self.debug {
            self.console.print(&format!("[syslog ({state})] {message}"));
        }
    }

    /// Report a line that could not be sent right away.
    pub(crate) fn queued(&self, state: ConnectionState, line: &str) {
        if self.debug {
            self.console.print(&format!("[q ({state})] {line}"));
        } else {
            self.console.print(&format!("[q] {line}"));
        }
    }

    /// Print a line verbatim.
    pub(crate) fn echo(&self, line: &str) {
        self.console.print(line);
    }

    pub(crate) fn is_debug(&self) -> bool {
        self.debug
    }
}
