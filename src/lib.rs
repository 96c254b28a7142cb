//! Resilient syslog forwarding over TLS.
//!
//! [`SyslogClient`] keeps a persistent TLS connection to a remote collector,
//! formats each log line as an RFC 5424 style record and buffers lines in a
//! byte-budgeted queue while the connection is down. Lines that would exceed
//! the queue budget, or are still pending at shutdown, are handed to an
//! [`OverflowSink`] (by default an hourly append-only file).

pub mod client;
pub mod config;
pub mod console;
pub mod error;
pub mod formatter;
pub mod overflow;
pub mod queue;

pub use client::{
    BackoffPolicy, ConnectError, ConnectionState, Delivery, Effect, Event, ReconnectBackoff,
    SyslogClient, Transition, apply_event, describe_io_error,
};
pub use config::{ClientConfig, ClientSettings, TlsOptions};
pub use console::{ConsoleSink, SharedConsole, StdoutConsole};
pub use error::ClientError;
pub use formatter::{SyslogFormatter, split_lines};
pub use overflow::{ExitHook, FileOverflowSink, OverflowSink, SpillOnExit};
pub use queue::{Enqueued, MessageQueue};
