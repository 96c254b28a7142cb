//! Shared helpers for the integration tests.

#![allow(dead_code)]

pub mod collector;
pub mod console;

use std::{
    net::TcpListener,
    thread,
    time::{Duration, Instant},
};

pub use collector::TlsCollector;
pub use console::CapturedConsole;

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Return a local port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}
