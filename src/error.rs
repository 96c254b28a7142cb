//! Errors reported while constructing a [`SyslogClient`](crate::SyslogClient).
//!
//! Transport failures after construction never surface here; they are
//! absorbed by the reconnect loop.

use std::io;

use thiserror::Error;

/// Failure to build a client from its configuration.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid user supplied configuration.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
    /// The TLS options could not be turned into a connector.
    #[error("invalid TLS options: {0}")]
    Tls(#[from] native_tls::Error),
    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] ini::ParseError),
    /// Underlying I/O error whilst reading configuration or certificates.
    #[error(transparent)]
    Io(#[from] io::Error),
}
