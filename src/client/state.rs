//! Connection state machine.
//!
//! [`apply_event`] is a pure function: it maps the current state and an
//! incoming transport event to the next state plus the side effects the
//! client core must execute. Keeping the table free of I/O lets the
//! reconnect rules be tested without a live socket.

use std::fmt;

/// Connection state of a [`SyslogClient`](crate::SyslogClient).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Connected,
    Error,
    Timeout,
    WaitReconnect,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::WaitReconnect => "wait-reconnect",
        }
    }

    fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that request a state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A new connection attempt is starting.
    Connect,
    /// The TLS handshake completed.
    Secured,
    /// The transport reported a low-level error.
    Failed,
    /// The idle timer fired.
    TimedOut,
    /// The transport closed.
    Closed,
}

impl Event {
    fn target(self) -> ConnectionState {
        match self {
            Self::Connect => ConnectionState::Connecting,
            Self::Secured => ConnectionState::Connected,
            Self::Failed => ConnectionState::Error,
            Self::TimedOut => ConnectionState::Timeout,
            Self::Closed => ConnectionState::Closed,
        }
    }
}

/// Side effects requested by a transition, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Replay the message queue through the send path.
    FlushQueue,
    /// Clear the error descriptor.
    ClearError,
    /// Restore the initial reconnect delay.
    ResetBackoff,
    /// Announce the established connection.
    ReportConnected,
    /// Announce the disconnection and the upcoming delay.
    ReportDisconnected,
    /// Release the transport handle of the failed attempt.
    DropTransport,
    /// Arm a reconnect timer for the current delay and grow the delay.
    ScheduleReconnect,
    /// The event was refused; only worth a debug line.
    Ignored(ConnectionState),
}

/// Result of [`apply_event`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub state: ConnectionState,
    /// Disconnected state passed through on the way to `state`.
    pub via: Option<ConnectionState>,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged(state: ConnectionState) -> Self {
        Self {
            state,
            via: None,
            effects: Vec::new(),
        }
    }

    /// Whether the transition altered the state or requested work.
    pub fn is_noop(&self, previous: ConnectionState) -> bool {
        self.state == previous && self.effects.is_empty()
    }
}

/// Compute the transition for `event` arriving in state `current`.
pub fn apply_event(current: ConnectionState, event: Event) -> Transition {
    use ConnectionState as S;

    let target = event.target();

    // Idle timeouts after the handshake only mean the socket is quiet.
    if current == S::Connected && event == Event::TimedOut {
        return Transition::unchanged(current);
    }

    if current == S::WaitReconnect && target != S::Connecting {
        // A refused connection reports an error followed by a close; the
        // close must not start a second backoff cycle.
        if target == S::Closed {
            return Transition::unchanged(current);
        }
        return Transition {
            state: current,
            via: None,
            effects: vec![Effect::Ignored(target)],
        };
    }

    if current != S::Connected && target == S::Connected {
        return Transition {
            state: S::Connected,
            via: None,
            effects: vec![
                Effect::FlushQueue,
                Effect::ReportConnected,
                Effect::ClearError,
                Effect::ResetBackoff,
            ],
        };
    }

    if current.is_live() && !target.is_live() {
        return Transition {
            state: S::WaitReconnect,
            via: Some(target),
            effects: vec![
                Effect::ReportDisconnected,
                Effect::DropTransport,
                Effect::ScheduleReconnect,
            ],
        };
    }

    Transition::unchanged(target)
}
