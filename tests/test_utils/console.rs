//! Console sink that records diagnostics for later assertions.

use std::sync::Arc;

use femtosyslog::ConsoleSink;
use parking_lot::Mutex;

/// Thread-safe capture of every console line printed by a client.
#[derive(Clone, Default)]
pub struct CapturedConsole {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CapturedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the captured lines.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }
}

impl ConsoleSink for CapturedConsole {
    fn print(&self, line: &str) {
        self.lines.lock().push(line.to_owned());
    }
}
