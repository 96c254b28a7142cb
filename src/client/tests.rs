//! Tests for the client core, driven without sockets.
//!
//! A recording [`Driver`] captures the attempts and timers the core asks
//! for; tests then feed transport events back in by hand, which makes the
//! reconnect races deterministic.

use std::{
    io,
    sync::Arc,
    time::Duration,
};

use crossbeam_channel::{Receiver, unbounded};
use parking_lot::Mutex;
use rstest::{fixture, rstest};
use static_assertions::assert_impl_all;

use super::{
    ConnectionState, CoreRef, Delivery, Driver, Outbound, SyslogClient, Timer, TransportEvent,
};
use crate::{config::ClientConfig, overflow::ExitHook};

#[derive(Clone, Debug, PartialEq)]
enum Request {
    Attempt(u64),
    Schedule {
        generation: u64,
        delay: Duration,
        timer: Timer,
    },
}

#[derive(Clone, Default)]
struct RecordingDriver {
    requests: Arc<Mutex<Vec<Request>>>,
}

impl Driver for RecordingDriver {
    fn start_attempt(&self, _core: CoreRef, generation: u64) {
        self.requests.lock().push(Request::Attempt(generation));
    }

    fn schedule(&self, _core: CoreRef, generation: u64, delay: Duration, timer: Timer) {
        self.requests.lock().push(Request::Schedule {
            generation,
            delay,
            timer,
        });
    }
}

type Shared<T> = Arc<Mutex<Vec<T>>>;

struct Harness {
    client: SyslogClient,
    requests: Shared<Request>,
    console: Shared<String>,
    spills: Shared<Vec<String>>,
}

impl Harness {
    fn new(config: ClientConfig) -> Self {
        let console: Shared<String> = Arc::default();
        let spills: Shared<Vec<String>> = Arc::default();
        let console_sink = Arc::clone(&console);
        let spill_sink = Arc::clone(&spills);
        let config = config
            .with_hostname("host")
            .with_procid(7)
            .with_console(move |line: &str| console_sink.lock().push(line.to_owned()))
            .with_overflow_sink(move |lines: &[String]| -> io::Result<()> {
                if !lines.is_empty() {
                    spill_sink.lock().push(lines.to_vec());
                }
                Ok(())
            });
        let driver = RecordingDriver::default();
        let requests = Arc::clone(&driver.requests);
        let client = SyslogClient::with_driver("collector", 6514, &config, Box::new(driver));
        Self {
            client,
            requests,
            console,
            spills,
        }
    }

    fn generation(&self) -> u64 {
        self.client.core.lock().generation
    }

    fn event(&self, generation: u64, event: TransportEvent) -> bool {
        self.client.core.lock().handle(generation, event)
    }

    fn fire(&self, generation: u64, timer: Timer) {
        self.client.core.lock().on_timer(generation, timer);
    }

    fn secure(&self) -> Receiver<Outbound> {
        let (tx, rx) = unbounded();
        assert!(self.event(self.generation(), TransportEvent::Secured(tx)));
        rx
    }

    fn fail(&self, reason: &str) {
        self.event(
            self.generation(),
            TransportEvent::Failed {
                reason: reason.into(),
                unsent: Vec::new(),
            },
        );
    }

    fn reconnect_delays(&self) -> Vec<u128> {
        self.requests
            .lock()
            .iter()
            .filter_map(|request| match request {
                Request::Schedule {
                    delay,
                    timer: Timer::Reconnect,
                    ..
                } => Some(delay.as_millis()),
                _ => None,
            })
            .collect()
    }

    fn attempts(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| matches!(request, Request::Attempt(_)))
            .count()
    }

    fn console_lines(&self) -> Vec<String> {
        self.console.lock().clone()
    }

    fn clear_console(&self) {
        self.console.lock().clear();
    }
}

fn lines_of(rx: &Receiver<Outbound>) -> Vec<String> {
    rx.try_iter().map(|outbound| outbound.line).collect()
}

#[fixture]
fn harness() -> Harness {
    Harness::new(ClientConfig::new())
}

#[test]
fn client_is_send_sync() {
    assert_impl_all!(SyslogClient: Send, Sync);
}

#[rstest]
fn construction_starts_first_attempt(harness: Harness) {
    assert_eq!(harness.client.state(), ConnectionState::Connecting);
    assert_eq!(
        *harness.requests.lock(),
        vec![
            Request::Attempt(1),
            Request::Schedule {
                generation: 1,
                delay: Duration::from_millis(15_000),
                timer: Timer::IdleTimeout,
            },
        ]
    );
    assert_eq!(
        harness.console_lines(),
        vec!["[syslog] logging to syslog server at collector:6514".to_owned()]
    );
}

#[test]
fn zero_socket_timeout_arms_no_idle_timer() {
    let harness = Harness::new(ClientConfig::new().with_socket_timeout(Duration::ZERO));
    assert_eq!(*harness.requests.lock(), vec![Request::Attempt(1)]);
}

#[rstest]
fn lines_logged_while_connecting_are_queued(harness: Harness) {
    harness.clear_console();
    let deliveries = harness.client.log("first\nsecond");
    assert_eq!(deliveries, vec![Delivery::Queued, Delivery::Queued]);
    assert_eq!(harness.client.queued(), 2);
    assert_eq!(harness.client.queue_size(), 6 + 7);
    assert_eq!(
        harness.console_lines(),
        vec!["[q] first".to_owned(), "[q] second".to_owned()]
    );
}

#[rstest]
#[case("")]
#[case("\n")]
#[case("\n\n\n")]
fn empty_messages_produce_no_records(harness: Harness, #[case] message: &str) {
    assert!(harness.client.log(message).is_empty());
    assert_eq!(harness.client.queued(), 0);
}

#[rstest]
fn handshake_replays_queue_in_order(harness: Harness) {
    harness.client.log("boot-1");
    harness.client.log("boot-2\nboot-3");
    harness.clear_console();

    let rx = harness.secure();

    assert_eq!(harness.client.state(), ConnectionState::Connected);
    assert_eq!(lines_of(&rx), vec!["boot-1", "boot-2", "boot-3"]);
    assert_eq!(harness.client.queued(), 0);
    assert_eq!(harness.client.queue_size(), 0);
    assert_eq!(
        harness.console_lines(),
        vec!["[syslog] connected to server, 3 queued messages sent".to_owned()]
    );
}

#[rstest]
fn replayed_records_are_formatted(harness: Harness) {
    harness.client.log("hello");
    let rx = harness.secure();
    let outbound = rx.try_recv().expect("replayed record");
    assert!(outbound.record.starts_with("<14> "));
    assert!(outbound.record.ends_with(" host app[7]: hello\n"));
}

#[rstest]
fn connected_client_sends_immediately(harness: Harness) {
    let rx = harness.secure();
    harness.clear_console();
    assert_eq!(harness.client.log("live"), vec![Delivery::Sent]);
    assert_eq!(lines_of(&rx), vec!["live"]);
    assert!(harness.console_lines().is_empty());
}

#[test]
fn console_echo_covers_sent_and_replayed_lines() {
    let harness = Harness::new(ClientConfig::new().with_also_log_to_console(true).with_quiet(true));
    harness.client.log("early");
    let _rx = harness.secure();
    harness.client.log("late");
    assert_eq!(
        harness.console_lines(),
        vec!["early", "[q] early", "early", "late"]
    );
}

#[rstest]
fn refused_connection_schedules_backoff(harness: Harness) {
    harness.clear_console();
    harness.fail("connection refused");

    assert_eq!(harness.client.state(), ConnectionState::WaitReconnect);
    assert_eq!(harness.client.error_state(), "connection refused");
    assert_eq!(
        harness.console_lines(),
        vec!["[syslog] could not connect to server (connection refused), retrying in 2.0 s".to_owned()]
    );
    assert_eq!(harness.reconnect_delays(), vec![2_000]);
    assert_eq!(harness.client.next_reconnect_delay(), Duration::from_millis(2_800));
}

#[rstest]
fn consecutive_failures_grow_the_delay(harness: Harness) {
    for _ in 0..3 {
        harness.fail("connection refused");
        harness.fire(harness.generation(), Timer::Reconnect);
        assert_eq!(harness.client.state(), ConnectionState::Connecting);
    }
    assert_eq!(harness.reconnect_delays(), vec![2_000, 2_800, 3_920]);
    assert_eq!(harness.attempts(), 4);
}

#[rstest]
fn delay_is_capped_at_maximum(harness: Harness) {
    for _ in 0..12 {
        harness.fail("connection refused");
        harness.fire(harness.generation(), Timer::Reconnect);
    }
    let delays = harness.reconnect_delays();
    assert!(delays.iter().all(|&delay| delay <= 15_000));
    assert_eq!(delays.last().copied(), Some(15_000));
}

#[rstest]
fn successful_connection_resets_backoff_and_error(harness: Harness) {
    harness.fail("no route to host");
    harness.fire(harness.generation(), Timer::Reconnect);
    harness.fail("no route to host");
    harness.fire(harness.generation(), Timer::Reconnect);
    let _rx = harness.secure();
    assert_eq!(harness.client.error_state(), "");
    assert_eq!(harness.client.next_reconnect_delay(), Duration::from_millis(2_000));
}

#[rstest]
fn close_after_refusal_does_not_start_second_cycle(harness: Harness) {
    let generation = harness.generation();
    harness.fail("connection refused");
    harness.clear_console();

    harness.event(generation, TransportEvent::Closed { unsent: Vec::new() });

    assert_eq!(harness.client.state(), ConnectionState::WaitReconnect);
    assert_eq!(harness.reconnect_delays(), vec![2_000]);
    assert!(harness.console_lines().is_empty());
}

#[rstest]
fn idle_timeout_after_connect_is_noop(harness: Harness) {
    let generation = harness.generation();
    let _rx = harness.secure();
    harness.clear_console();
    let requests_before = harness.requests.lock().len();

    harness.fire(generation, Timer::IdleTimeout);

    assert_eq!(harness.client.state(), ConnectionState::Connected);
    assert!(harness.console_lines().is_empty());
    assert_eq!(harness.requests.lock().len(), requests_before);
}

#[rstest]
fn idle_timeout_while_connecting_forces_retry(harness: Harness) {
    harness.clear_console();
    harness.fire(harness.generation(), Timer::IdleTimeout);
    assert_eq!(harness.client.state(), ConnectionState::WaitReconnect);
    assert_eq!(harness.client.error_state(), "no response in 15.0 s");
    assert_eq!(
        harness.console_lines(),
        vec!["[syslog] could not connect to server (no response in 15.0 s), retrying in 2.0 s".to_owned()]
    );
}

#[rstest]
fn handshake_after_timeout_is_refused(harness: Harness) {
    let generation = harness.generation();
    harness.fire(generation, Timer::IdleTimeout);
    let (tx, _rx) = unbounded();
    assert!(!harness.event(generation, TransportEvent::Secured(tx)));
    assert_eq!(harness.client.state(), ConnectionState::WaitReconnect);
}

#[rstest]
fn superseded_attempt_cannot_change_state(harness: Harness) {
    let stale = harness.generation();
    harness.client.reconnect();
    assert_eq!(harness.generation(), stale + 1);
    assert_eq!(harness.client.state(), ConnectionState::Connecting);

    let (tx, _rx) = unbounded();
    assert!(!harness.event(stale, TransportEvent::Secured(tx)));
    assert!(!harness.event(
        stale,
        TransportEvent::Failed {
            reason: "connection refused".into(),
            unsent: Vec::new(),
        },
    ));
    assert!(!harness.event(stale, TransportEvent::Closed { unsent: Vec::new() }));

    assert_eq!(harness.client.state(), ConnectionState::Connecting);
    assert_eq!(harness.client.error_state(), "");
    assert!(harness.reconnect_delays().is_empty());
}

#[rstest]
fn stale_reconnect_timer_is_ignored(harness: Harness) {
    harness.fail("connection refused");
    let timer_generation = harness.generation();
    harness.client.reconnect();
    let attempts = harness.attempts();

    harness.fire(timer_generation, Timer::Reconnect);

    assert_eq!(harness.attempts(), attempts);
    assert_eq!(harness.client.state(), ConnectionState::Connecting);
}

#[rstest]
fn forced_reconnect_while_connected_queues_until_handshake(harness: Harness) {
    let old = harness.secure();
    harness.client.reconnect();
    assert!(old.try_recv().is_err());
    assert_eq!(harness.client.log("between"), vec![Delivery::Queued]);
    let new = harness.secure();
    assert_eq!(lines_of(&new), vec!["between"]);
}

#[rstest]
fn lost_connection_requeues_unsent_lines_first(harness: Harness) {
    let _rx = harness.secure();
    harness.event(
        harness.generation(),
        TransportEvent::Failed {
            reason: "error 104".into(),
            unsent: vec!["a".into(), "b".into()],
        },
    );
    harness.client.log("c");
    harness.fire(harness.generation(), Timer::Reconnect);
    let rx = harness.secure();
    assert_eq!(lines_of(&rx), vec!["a", "b", "c"]);
}

#[rstest]
fn peer_close_reports_connection_closed(harness: Harness) {
    let _rx = harness.secure();
    harness.event(harness.generation(), TransportEvent::Closed { unsent: Vec::new() });
    assert_eq!(harness.client.state(), ConnectionState::WaitReconnect);
    assert_eq!(harness.client.error_state(), "connection closed");
}

#[test]
fn overflow_spills_full_queue_once() {
    let harness = Harness::new(ClientConfig::new().with_queue_overflow_limit(12));
    harness.client.log("aaaa");
    harness.client.log("bbbb");
    assert!(harness.spills.lock().is_empty());
    harness.client.log("cccc");

    assert_eq!(
        *harness.spills.lock(),
        vec![vec!["aaaa".to_owned(), "bbbb".to_owned(), "cccc".to_owned()]]
    );
    assert_eq!(harness.client.queued(), 0);
    assert_eq!(harness.client.queue_size(), 0);
}

#[rstest]
fn spill_pending_hands_queue_to_sink(harness: Harness) {
    harness.client.log("x\ny");
    assert_eq!(harness.client.spill_pending(), 2);
    assert_eq!(*harness.spills.lock(), vec![vec!["x".to_owned(), "y".to_owned()]]);
    assert_eq!(harness.client.queued(), 0);
}

#[rstest]
fn shutdown_passes_pending_lines_to_exit_hook(harness: Harness) {
    harness.client.log("unsent");
    harness.client.shutdown();
    assert_eq!(*harness.spills.lock(), vec![vec!["unsent".to_owned()]]);
    assert_eq!(harness.client.state(), ConnectionState::Closed);

    harness.client.shutdown();
    assert_eq!(harness.spills.lock().len(), 1);
}

#[rstest]
fn shutdown_stops_reconnecting(harness: Harness) {
    harness.fail("connection refused");
    let generation = harness.generation();
    let attempts = harness.attempts();
    harness.client.shutdown();
    harness.fire(generation, Timer::Reconnect);
    assert_eq!(harness.attempts(), attempts);
}

#[rstest]
fn lines_logged_after_shutdown_are_spilled(harness: Harness) {
    harness.client.shutdown();
    assert_eq!(harness.client.log("late"), vec![Delivery::Queued]);
    assert_eq!(*harness.spills.lock(), vec![vec!["late".to_owned()]]);
}

#[test]
fn exit_handler_can_be_disabled() {
    let harness = Harness::new(ClientConfig::new().with_install_exit_handler(false));
    harness.client.log("kept");
    harness.client.shutdown();
    assert!(harness.spills.lock().is_empty());
}

#[test]
fn custom_exit_hook_receives_pending_lines() {
    struct Recorder(Shared<String>);

    impl ExitHook for Recorder {
        fn on_exit(&self, pending: &[String]) {
            self.0.lock().extend_from_slice(pending);
        }
    }

    let seen: Shared<String> = Arc::default();
    let harness = Harness::new(ClientConfig::new().with_exit_hook(Recorder(Arc::clone(&seen))));
    harness.client.log("one\ntwo");
    drop(harness);
    assert_eq!(*seen.lock(), vec!["one".to_owned(), "two".to_owned()]);
}

#[test]
fn debug_mode_reports_ignored_state_changes() {
    let harness = Harness::new(ClientConfig::new().with_debug(true));
    harness.fail("connection refused");
    harness.clear_console();

    harness.fail("error 104");
    harness.client.log("queued");

    assert_eq!(harness.client.state(), ConnectionState::WaitReconnect);
    assert_eq!(
        harness.console_lines(),
        vec![
            "[syslog (wait-reconnect)] socket error (error 104)".to_owned(),
            "[syslog (wait-reconnect)] Ignore state change attempt (to error)".to_owned(),
            "[q (wait-reconnect)] queued".to_owned(),
        ]
    );
}

#[test]
fn debug_trace_passes_through_error_state() {
    let harness = Harness::new(ClientConfig::new().with_debug(true));
    harness.clear_console();

    harness.fail("connection refused");
    harness.fire(harness.generation(), Timer::Reconnect);

    assert_eq!(
        harness.console_lines(),
        vec![
            "[syslog (connecting)] socket error (connection refused)".to_owned(),
            "[syslog (connecting)] state = error".to_owned(),
            "[syslog (error)] state = wait-reconnect".to_owned(),
            "[syslog] could not connect to server (connection refused), retrying in 2.0 s; state = wait-reconnect"
                .to_owned(),
            "[syslog (wait-reconnect)] state = connecting".to_owned(),
        ]
    );
}

#[rstest]
#[case(TransportEvent::TimedOut, "timeout")]
#[case(TransportEvent::Closed { unsent: Vec::new() }, "closed")]
fn debug_trace_names_disconnect_cause(#[case] event: TransportEvent, #[case] via: &str) {
    let harness = Harness::new(ClientConfig::new().with_debug(true));
    if matches!(event, TransportEvent::Closed { .. }) {
        let _rx = harness.secure();
    }
    harness.clear_console();

    harness.event(harness.generation(), event);

    let lines = harness.console_lines();
    let previous = if via == "closed" { "connected" } else { "connecting" };
    assert!(lines.contains(&format!("[syslog ({previous})] state = {via}")), "{lines:?}");
    assert!(lines.contains(&format!("[syslog ({via})] state = wait-reconnect")), "{lines:?}");
}

#[test]
fn quiet_mode_hides_connection_notices() {
    let harness = Harness::new(ClientConfig::new().with_quiet(true));
    harness.fail("connection refused");
    harness.fire(harness.generation(), Timer::Reconnect);
    let _rx = harness.secure();
    assert!(harness.console_lines().is_empty());
}
