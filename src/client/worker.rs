//! Background threads driving connection attempts, socket I/O and timers.
//!
//! Each connection attempt runs on its own thread. Once the handshake is
//! accepted by the core the same thread becomes the connection's I/O loop:
//! it writes records received over a channel and polls the socket to notice
//! when the peer goes away.

use std::{thread, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};

use super::{
    CoreRef, Driver, Outbound, Timer, TransportEvent,
    transport::{ActiveConnection, Endpoint, Probe, connect_tls},
};

/// How long the I/O loop waits for outbound records before probing the
/// socket for a close.
const IDLE_POLL: Duration = Duration::from_millis(100);
/// Read window used when probing.
const PROBE_WINDOW: Duration = Duration::from_millis(10);

/// [`Driver`] backed by OS threads.
pub(crate) struct ThreadDriver {
    endpoint: Endpoint,
}

impl ThreadDriver {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

impl Driver for ThreadDriver {
    fn start_attempt(&self, core: CoreRef, generation: u64) {
        let endpoint = self.endpoint.clone();
        let spawned = thread::Builder::new()
            .name(format!("syslog-connect-{generation}"))
            .spawn(move || run_attempt(core, generation, endpoint));
        if let Err(err) = spawned {
            log::warn!("syslog client could not spawn connection thread: {err}");
        }
    }

    fn schedule(&self, core: CoreRef, generation: u64, delay: Duration, timer: Timer) {
        let spawned = thread::Builder::new()
            .name(format!("syslog-timer-{generation}"))
            .spawn(move || {
                thread::sleep(delay);
                if let Some(core) = core.upgrade() {
                    core.lock().on_timer(generation, timer);
                }
            });
        if let Err(err) = spawned {
            log::warn!("syslog client could not spawn timer thread: {err}");
        }
    }
}

fn report(core: &CoreRef, generation: u64, event: TransportEvent) -> bool {
    match core.upgrade() {
        Some(core) => core.lock().handle(generation, event),
        None => false,
    }
}

fn run_attempt(core: CoreRef, generation: u64, endpoint: Endpoint) {
    let stream = match connect_tls(&endpoint) {
        Ok(stream) => stream,
        Err(err) if err.is_timeout() => {
            report(&core, generation, TransportEvent::TimedOut);
            return;
        }
        Err(err) => {
            let reason = err.to_string();
            report(
                &core,
                generation,
                TransportEvent::Failed {
                    reason,
                    unsent: Vec::new(),
                },
            );
            return;
        }
    };
    let connection = match ActiveConnection::new(stream, PROBE_WINDOW) {
        Ok(connection) => connection,
        Err(err) => {
            let reason = super::describe_io_error(&err);
            report(
                &core,
                generation,
                TransportEvent::Failed {
                    reason,
                    unsent: Vec::new(),
                },
            );
            return;
        }
    };
    let (tx, rx) = unbounded();
    if !report(&core, generation, TransportEvent::Secured(tx)) {
        log::debug!("syslog client destroying superseded connection {generation}");
        connection.destroy();
        return;
    }
    run_connection(core, generation, connection, rx);
}

fn run_connection(
    core: CoreRef,
    generation: u64,
    mut connection: ActiveConnection,
    rx: Receiver<Outbound>,
) {
    loop {
        match rx.recv_timeout(IDLE_POLL) {
            Ok(outbound) => {
                if let Err(err) = connection.write_all(outbound.record.as_bytes()) {
                    let reason = super::describe_io_error(&err);
                    report_lost(&core, generation, &rx, |unsent| TransportEvent::Failed {
                        reason,
                        unsent,
                    });
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => match connection.probe() {
                Ok(Probe::Idle) => {}
                Ok(Probe::Closed) => {
                    report_lost(&core, generation, &rx, |unsent| TransportEvent::Closed {
                        unsent,
                    });
                    break;
                }
                Err(err) => {
                    let reason = super::describe_io_error(&err);
                    report_lost(&core, generation, &rx, |unsent| TransportEvent::Failed {
                        reason,
                        unsent,
                    });
                    break;
                }
            },
            // The core dropped this connection and everything buffered has
            // been written.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    connection.destroy();
}

/// Report the end of a connection, handing back records still buffered in
/// `rx`. The channel is drained while the core is locked so no record can
/// slip in between.
fn report_lost(
    core: &CoreRef,
    generation: u64,
    rx: &Receiver<Outbound>,
    event: impl FnOnce(Vec<String>) -> TransportEvent,
) {
    let Some(core) = core.upgrade() else {
        return;
    };
    let mut core = core.lock();
    let unsent = rx.try_iter().map(|outbound| outbound.line).collect();
    core.handle(generation, event(unsent));
}
