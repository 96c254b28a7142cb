//! Resilient TLS syslog forwarding client.
//!
//! [`SyslogClient`] accepts log lines and forwards them to a remote collector
//! over a persistent TLS connection. While the connection is down lines are
//! held in a byte-budgeted queue and replayed in order once the next
//! handshake succeeds. Reconnection attempts follow an exponential backoff
//! schedule.
//!
//! All client state lives in one [`ClientCore`] behind a mutex. Background
//! threads (connection attempts, per-connection I/O, timers) only hold a weak
//! reference and tag every event with the attempt generation they belong to,
//! so events from superseded attempts are recognised and discarded.

mod backoff;
mod state;
mod transport;
mod worker;

#[cfg(test)]
mod tests;

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::{
    config::ClientConfig,
    console::Diagnostics,
    error::ClientError,
    formatter::{SyslogFormatter, split_lines},
    overflow::{ExitHook, FileOverflowSink, OverflowSink, SpillOnExit},
    queue::{Enqueued, MessageQueue},
};

pub use backoff::{BackoffPolicy, ReconnectBackoff};
pub use state::{ConnectionState, Effect, Event, Transition, apply_event};
pub use transport::{ConnectError, describe_io_error};

use transport::Endpoint;
use worker::ThreadDriver;

pub(crate) type CoreRef = Weak<Mutex<ClientCore>>;

/// How a single line was handled by [`SyslogClient::log`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the live connection.
    Sent,
    /// Held in the queue until the next connection.
    Queued,
}

/// A line on its way to the I/O thread.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub(crate) line: String,
    pub(crate) record: String,
}

/// Events reported by background threads.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// Handshake done; records for the connection go to this channel.
    Secured(Sender<Outbound>),
    /// The attempt or connection failed. `unsent` holds lines that were
    /// handed over but never written.
    Failed {
        reason: String,
        unsent: Vec<String>,
    },
    TimedOut,
    Closed {
        unsent: Vec<String>,
    },
}

/// Timers armed by the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Timer {
    Reconnect,
    IdleTimeout,
}

/// Runs the asynchronous parts of the client on behalf of the core.
///
/// Implementations must not lock the core from inside these calls.
pub(crate) trait Driver: Send + Sync {
    /// Begin connection attempt `generation`.
    fn start_attempt(&self, core: CoreRef, generation: u64);
    /// Call [`ClientCore::on_timer`] after `delay`.
    fn schedule(&self, core: CoreRef, generation: u64, delay: Duration, timer: Timer);
}

/// Mutable client state, serialised behind one mutex.
pub(crate) struct ClientCore {
    this: CoreRef,
    driver: Box<dyn Driver>,
    formatter: SyslogFormatter,
    diagnostics: Diagnostics,
    also_log_to_console: bool,
    socket_timeout: Option<Duration>,
    state: ConnectionState,
    error_state: String,
    backoff: ReconnectBackoff,
    queue: MessageQueue,
    overflow: Arc<dyn OverflowSink>,
    exit_hook: Option<Arc<dyn ExitHook>>,
    generation: u64,
    link: Option<Sender<Outbound>>,
    shut_down: bool,
}

impl ClientCore {
    fn new(this: CoreRef, driver: Box<dyn Driver>, config: &ClientConfig) -> Self {
        let diagnostics = Diagnostics::new(config.console.clone(), config.quiet, config.debug);
        let overflow: Arc<dyn OverflowSink> = match &config.overflow_sink {
            Some(sink) => Arc::clone(sink),
            None => {
                let mut sink = FileOverflowSink::new(config.effective_log_prefix());
                if let Some(directory) = &config.overflow_directory {
                    sink = sink.with_directory(directory);
                }
                if !config.quiet {
                    sink = sink.with_console(config.console.clone());
                }
                Arc::new(sink)
            }
        };
        let exit_hook = config.install_exit_handler.then(|| match &config.exit_hook {
            Some(hook) => Arc::clone(hook),
            None => Arc::new(SpillOnExit::new(Arc::clone(&overflow))) as Arc<dyn ExitHook>,
        });
        Self {
            this,
            driver,
            formatter: SyslogFormatter::new(
                config.appname.clone(),
                config.effective_hostname(),
                config.effective_procid(),
            ),
            diagnostics,
            also_log_to_console: config.also_log_to_console,
            socket_timeout: config.connect_timeout(),
            state: ConnectionState::Closed,
            error_state: String::new(),
            backoff: ReconnectBackoff::new(config.backoff),
            queue: MessageQueue::new(config.queue_overflow_limit),
            overflow,
            exit_hook,
            generation: 0,
            link: None,
            shut_down: false,
        }
    }

    /// Start a new connection attempt, superseding any previous one.
    fn connect(&mut self) {
        if self.shut_down {
            return;
        }
        self.generation += 1;
        self.transition(Event::Connect);
        if self.state != ConnectionState::Connecting {
            return;
        }
        self.driver.start_attempt(self.this.clone(), self.generation);
        if let Some(timeout) = self.socket_timeout {
            self.driver
                .schedule(self.this.clone(), self.generation, timeout, Timer::IdleTimeout);
        }
    }

    /// Drop the live connection and start over immediately.
    fn reconnect(&mut self) {
        self.link = None;
        self.connect();
    }

    /// Apply a transport event. Returns `false` when the event belongs to a
    /// superseded attempt (or did not lead to a connection, for
    /// [`TransportEvent::Secured`]); the caller must then destroy its handle.
    pub(crate) fn handle(&mut self, generation: u64, event: TransportEvent) -> bool {
        if self.shut_down || generation != self.generation {
            log::debug!(
                "syslog client ignoring event from stale attempt {generation} (current {})",
                self.generation
            );
            if let TransportEvent::Failed { unsent, .. } | TransportEvent::Closed { unsent } = event {
                self.restore(unsent);
            }
            return false;
        }
        let live = matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        );
        match event {
            TransportEvent::Secured(link) => {
                if self.state != ConnectionState::Connecting {
                    return false;
                }
                self.link = Some(link);
                self.transition(Event::Secured);
                if self.state != ConnectionState::Connected {
                    self.link = None;
                    return false;
                }
            }
            TransportEvent::Failed { reason, unsent } => {
                self.diagnostics.debug(self.state, &format!("socket error ({reason})"));
                if live {
                    self.error_state = reason;
                }
                self.transition(Event::Failed);
                self.restore(unsent);
            }
            TransportEvent::TimedOut => {
                if self.state == ConnectionState::Connected {
                    return true;
                }
                if live {
                    self.error_state = self.timeout_reason();
                }
                self.transition(Event::TimedOut);
            }
            TransportEvent::Closed { unsent } => {
                if live {
                    self.error_state = "connection closed".into();
                }
                self.transition(Event::Closed);
                self.restore(unsent);
            }
        }
        true
    }

    /// React to an expired timer armed for `generation`.
    pub(crate) fn on_timer(&mut self, generation: u64, timer: Timer) {
        match timer {
            Timer::Reconnect => {
                if generation == self.generation
                    && self.state == ConnectionState::WaitReconnect
                    && !self.shut_down
                {
                    self.connect();
                }
            }
            Timer::IdleTimeout => {
                self.handle(generation, TransportEvent::TimedOut);
            }
        }
    }

    fn timeout_reason(&self) -> String {
        match self.socket_timeout {
            Some(timeout) => format!("no response in {:.1} s", timeout.as_secs_f64()),
            None => "connection timed out".into(),
        }
    }

    fn transition(&mut self, event: Event) {
        let previous = self.state;
        let Transition {
            state,
            via,
            effects,
        } = apply_event(previous, event);
        let mut shown = previous;
        for step in via.into_iter().chain((state != previous).then_some(state)) {
            self.diagnostics.debug(shown, &format!("state = {step}"));
            shown = step;
        }
        self.state = state;
        let mut flushed = 0;
        for effect in effects {
            match effect {
                Effect::FlushQueue => {
                    let pending = self.queue.take();
                    flushed = pending.len();
                    for line in pending {
                        self.send_line(line);
                    }
                }
                Effect::ReportConnected => self.diagnostics.notice(|| {
                    if flushed > 0 {
                        format!("connected to server, {flushed} queued messages sent")
                    } else {
                        "connected to server".into()
                    }
                }),
                Effect::ClearError => self.error_state.clear(),
                Effect::ResetBackoff => self.backoff.reset(),
                Effect::ReportDisconnected => {
                    let delay = self.backoff.peek().as_secs_f64();
                    let suffix = if self.diagnostics.is_debug() {
                        "; state = wait-reconnect"
                    } else {
                        ""
                    };
                    let error = &self.error_state;
                    self.diagnostics.notice(|| {
                        format!("could not connect to server ({error}), retrying in {delay:.1} s{suffix}")
                    });
                }
                Effect::DropTransport => {
                    self.link = None;
                    self.generation += 1;
                }
                Effect::ScheduleReconnect => {
                    let delay = self.backoff.advance();
                    self.driver
                        .schedule(self.this.clone(), self.generation, delay, Timer::Reconnect);
                }
                Effect::Ignored(target) => self
                    .diagnostics
                    .debug(self.state, &format!("Ignore state change attempt (to {target})")),
            }
        }
    }

    fn log(&mut self, message: &str) -> Vec<Delivery> {
        split_lines(message)
            .map(|line| self.send_line(line.to_owned()))
            .collect()
    }

    fn send_line(&mut self, line: String) -> Delivery {
        if self.also_log_to_console {
            self.diagnostics.echo(&line);
        }
        self.deliver(line)
    }

    fn deliver(&mut self, line: String) -> Delivery {
        if self.state == ConnectionState::Connected {
            if let Some(link) = &self.link {
                let record = self.formatter.format(&line);
                match link.send(Outbound { line, record }) {
                    Ok(()) => return Delivery::Sent,
                    // The I/O thread is gone; its failure report is on the way.
                    Err(err) => return self.enqueue(err.into_inner().line),
                }
            }
        }
        self.enqueue(line)
    }

    fn enqueue(&mut self, line: String) -> Delivery {
        self.diagnostics.queued(self.state, &line);
        if self.shut_down {
            self.spill(&[line]);
            return Delivery::Queued;
        }
        if let Enqueued::Overflowed(snapshot) = self.queue.enqueue(line) {
            self.spill(&snapshot);
        }
        Delivery::Queued
    }

    /// Route lines that never reached the socket through delivery again.
    fn restore(&mut self, unsent: Vec<String>) {
        if unsent.is_empty() {
            return;
        }
        log::debug!("syslog client re-delivering {} unsent lines", unsent.len());
        for line in unsent {
            self.deliver(line);
        }
    }

    fn spill(&self, lines: &[String]) {
        if let Err(err) = self.overflow.spill(lines) {
            log::warn!("syslog client failed to persist {} queued lines: {err}", lines.len());
        }
    }

    fn spill_pending(&mut self) -> usize {
        let pending = self.queue.take();
        self.spill(&pending);
        pending.len()
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.link = None;
        self.generation += 1;
        self.state = ConnectionState::Closed;
        let pending = self.queue.take();
        match &self.exit_hook {
            Some(hook) => hook.on_exit(&pending),
            None if !pending.is_empty() => {
                log::warn!("syslog client shut down with {} undelivered lines", pending.len());
            }
            None => {}
        }
    }
}

/// Forwards log lines to a remote syslog collector over TLS.
///
/// Construction starts the first connection attempt immediately; lines can
/// be logged right away and are queued until the handshake completes.
///
/// ```no_run
/// use femtosyslog::{ClientConfig, SyslogClient};
///
/// let client = SyslogClient::connect("logs.example.com", 6514, ClientConfig::new().with_appname("billing"))?;
/// client.log("service started");
/// # Ok::<(), femtosyslog::ClientError>(())
/// ```
pub struct SyslogClient {
    core: Arc<Mutex<ClientCore>>,
    target: String,
}

impl SyslogClient {
    /// Validate `config` and begin connecting to `host:port`.
    pub fn connect(host: &str, port: u16, config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let connector = transport::build_connector(&config.tls)?;
        let endpoint = Endpoint {
            host: host.to_owned(),
            port,
            domain: config.tls.domain.clone().unwrap_or_else(|| host.to_owned()),
            connector,
            timeout: config.connect_timeout(),
        };
        Ok(Self::with_driver(host, port, &config, Box::new(ThreadDriver::new(endpoint))))
    }

    /// Build a client from settings loaded with
    /// [`ClientSettings`](crate::ClientSettings).
    pub fn from_settings(settings: crate::ClientSettings) -> Result<Self, ClientError> {
        Self::connect(&settings.host, settings.port, settings.config)
    }

    pub(crate) fn with_driver(
        host: &str,
        port: u16,
        config: &ClientConfig,
        driver: Box<dyn Driver>,
    ) -> Self {
        let core = Arc::new_cyclic(|this| Mutex::new(ClientCore::new(this.clone(), driver, config)));
        let target = format!("{host}:{port}");
        {
            let mut core = core.lock();
            core.diagnostics
                .notice(|| format!("logging to syslog server at {target}"));
            core.connect();
        }
        Self { core, target }
    }

    /// Send `message`, one record per non-empty line.
    ///
    /// Returns how each line was handled. Transport problems are never
    /// reported here; they only affect whether lines are sent or queued.
    pub fn log(&self, message: impl fmt::Display) -> Vec<Delivery> {
        let message = message.to_string();
        self.core.lock().log(&message)
    }

    pub fn state(&self) -> ConnectionState {
        self.core.lock().state
    }

    /// Description of the last connection problem; empty once connected.
    pub fn error_state(&self) -> String {
        self.core.lock().error_state.clone()
    }

    /// Number of lines waiting for a connection.
    pub fn queued(&self) -> usize {
        self.core.lock().queue.len()
    }

    /// Byte count charged against the overflow limit.
    pub fn queue_size(&self) -> usize {
        self.core.lock().queue.size()
    }

    /// Delay before the next reconnection attempt.
    pub fn next_reconnect_delay(&self) -> Duration {
        self.core.lock().backoff.peek()
    }

    /// Abandon the current connection or attempt and connect again now.
    pub fn reconnect(&self) {
        self.core.lock().reconnect();
    }

    /// Hand everything queued to the overflow sink. Returns the number of
    /// lines spilled.
    pub fn spill_pending(&self) -> usize {
        self.core.lock().spill_pending()
    }

    /// Stop reconnecting, close the connection and pass pending lines to the
    /// exit hook. Later calls are no-ops.
    pub fn shutdown(&self) {
        self.core.lock().shutdown();
    }

    /// `host:port` this client forwards to.
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for SyslogClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for SyslogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyslogClient")
            .field("target", &self.target)
            .field("state", &self.state())
            .finish()
    }
}
