//! Syslog record formatting.
//!
//! Every line handed to [`SyslogClient::log`](crate::SyslogClient::log) is
//! rendered as a single RFC 5424-flavoured text record terminated by a
//! newline. The collector splits records on newline boundaries, so callers
//! must split multi-line messages first with [`split_lines`].

use chrono::{DateTime, SecondsFormat, Utc};

/// Facility code for user-level messages.
pub const FACILITY_USER: u8 = 1;
/// Severity code for informational messages.
pub const SEVERITY_INFO: u8 = 6;

/// Identity fields stamped onto every record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyslogFormatter {
    appname: String,
    hostname: String,
    procid: u32,
}

impl SyslogFormatter {
    /// Create a formatter for the given identity.
    pub fn new(appname: impl Into<String>, hostname: impl Into<String>, procid: u32) -> Self {
        Self {
            appname: appname.into(),
            hostname: hostname.into(),
            procid,
        }
    }

    /// Priority value combining facility and severity.
    pub const fn priority() -> u8 {
        FACILITY_USER * 8 + SEVERITY_INFO
    }

    /// Format `line` using the current wall-clock time.
    pub fn format(&self, line: &str) -> String {
        self.format_at(line, Utc::now())
    }

    /// Format `line` stamped with `timestamp`.
    ///
    /// The timestamp is rendered in UTC with millisecond precision and a `Z`
    /// suffix, e.g. `2019-09-23T11:04:05.123Z`.
    pub fn format_at(&self, line: &str, timestamp: DateTime<Utc>) -> String {
        format!(
            "<{}> {} {} {}[{}]: {}\n",
            Self::priority(),
            timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.hostname,
            self.appname,
            self.procid,
            line
        )
    }
}

/// Split `message` on `\n`, discarding empty pieces.
pub fn split_lines(message: &str) -> impl Iterator<Item = &str> {
    message.split('\n').filter(|line| !line.is_empty())
}
