//! In-process TLS syslog collector.
//!
//! Serves a freshly minted self-signed certificate for `localhost` and
//! forwards every received line over a channel. Accepting can be held back
//! so tests control exactly when the client's handshake completes.

use std::{
    io::{BufRead, BufReader},
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use native_tls::{Identity, TlsAcceptor};

pub struct TlsCollector {
    port: u16,
    certificate: Vec<u8>,
    records: Receiver<String>,
    closed: Receiver<()>,
    gate: Sender<()>,
}

impl TlsCollector {
    /// Start listening. No connection is accepted until [`Self::open`].
    pub fn start() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()])
            .expect("generate self-signed certificate");
        let certificate = certified.cert.pem().into_bytes();
        let key = certified.key_pair.serialize_pem().into_bytes();
        let identity = Identity::from_pkcs8(&certificate, &key).expect("load identity");
        let acceptor = Arc::new(TlsAcceptor::new(identity).expect("build acceptor"));

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind collector");
        let port = listener.local_addr().expect("collector addr").port();
        let (records_tx, records) = unbounded();
        let (closed_tx, closed) = unbounded();
        let (gate, gate_rx) = unbounded::<()>();
        thread::spawn(move || {
            if gate_rx.recv().is_err() {
                return;
            }
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let acceptor = Arc::clone(&acceptor);
                let records_tx = records_tx.clone();
                let closed_tx = closed_tx.clone();
                thread::spawn(move || {
                    if serve(&acceptor, stream, &records_tx) {
                        let _ = closed_tx.send(());
                    }
                });
            }
        });
        Self {
            port,
            certificate,
            records,
            closed,
            gate,
        }
    }

    /// Start accepting connections.
    pub fn open(&self) {
        let _ = self.gate.send(());
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// PEM encoded certificate the collector presents.
    pub fn certificate(&self) -> Vec<u8> {
        self.certificate.clone()
    }

    /// Wait for the next received record (without its trailing newline).
    pub fn next_record(&self, timeout: Duration) -> Option<String> {
        self.records.recv_timeout(timeout).ok()
    }

    /// Wait until a connection that completed its handshake is closed by
    /// the client.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        self.closed.recv_timeout(timeout).is_ok()
    }

    /// Records received so far without waiting.
    pub fn drain(&self) -> Vec<String> {
        self.records.try_iter().collect()
    }
}

/// Forward lines from one connection. Returns `true` once an established
/// connection ends.
fn serve(acceptor: &TlsAcceptor, stream: TcpStream, records: &Sender<String>) -> bool {
    let Ok(tls) = acceptor.accept(stream) else {
        return false;
    };
    let mut reader = BufReader::new(tls);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return true,
            Ok(_) => {
                let record = line.trim_end_matches('\n').to_owned();
                if records.send(record).is_err() {
                    return false;
                }
            }
        }
    }
}
