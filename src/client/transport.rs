//! TLS transport primitives for the forwarding client.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use native_tls::{Certificate, HandshakeError, TlsConnector, TlsStream};
use socket2::SockRef;
use thiserror::Error;

use crate::config::TlsOptions;

/// Failure of a single connection attempt or of a live connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The host name did not resolve to any address.
    #[error("could not resolve hostname")]
    Resolve(#[source] io::Error),
    /// The attempt did not complete within the configured socket timeout.
    #[error("timed out")]
    TimedOut,
    /// The TLS handshake was rejected.
    #[error("error {0}")]
    Handshake(String),
    /// Any other socket error.
    #[error("{}", describe_io_error(.0))]
    Io(#[from] io::Error),
}

impl ConnectError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::TimedOut => true,
            Self::Io(err) => is_timeout_kind(err.kind()),
            _ => false,
        }
    }
}

fn is_timeout_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// Render common socket errors as short human-readable phrases.
pub fn describe_io_error(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => "connection refused".into(),
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
            "no route to host".into()
        }
        io::ErrorKind::AddrNotAvailable => "address not available".into(),
        _ => match err.raw_os_error() {
            Some(code) => format!("error {code}"),
            None => format!("error {err}"),
        },
    }
}

/// Build the TLS connector described by `options`.
///
/// Malformed root certificates are reported here so configuration errors
/// surface at construction time rather than inside the retry loop.
pub fn build_connector(options: &TlsOptions) -> Result<TlsConnector, native_tls::Error> {
    let mut builder = TlsConnector::builder();
    for pem in &options.root_certificates {
        builder.add_root_certificate(Certificate::from_pem(pem)?);
    }
    if options.disable_built_in_roots {
        builder.disable_built_in_roots(true);
    }
    if options.insecure_skip_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    builder.build()
}

/// Where and how to connect.
#[derive(Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Name presented for SNI and certificate validation.
    pub domain: String,
    pub connector: TlsConnector,
    /// Bound on connect and handshake; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Endpoint {
    fn socket_addrs(&self) -> Result<Vec<SocketAddr>, ConnectError> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(ConnectError::Resolve)?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectError::Resolve(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}", self.host),
            )));
        }
        Ok(addrs)
    }
}

fn connect_tcp(endpoint: &Endpoint) -> Result<TcpStream, ConnectError> {
    let mut last_err = None;
    for addr in endpoint.socket_addrs()? {
        let attempt = match endpoint.timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.map_or(ConnectError::TimedOut, ConnectError::from))
}

fn configure_socket(stream: &TcpStream) -> io::Result<()> {
    SockRef::from(stream).set_keepalive(true)?;
    stream.set_nodelay(true)
}

/// Open a TCP connection to `endpoint` and complete the TLS handshake.
pub fn connect_tls(endpoint: &Endpoint) -> Result<TlsStream<TcpStream>, ConnectError> {
    let stream = connect_tcp(endpoint)?;
    configure_socket(&stream)?;
    stream.set_read_timeout(endpoint.timeout)?;
    stream.set_write_timeout(endpoint.timeout)?;
    let tls = match endpoint.connector.connect(&endpoint.domain, stream) {
        Ok(tls) => tls,
        Err(HandshakeError::Failure(err)) => return Err(ConnectError::Handshake(err.to_string())),
        Err(HandshakeError::WouldBlock(_)) => return Err(ConnectError::TimedOut),
    };
    tls.get_ref().set_write_timeout(None)?;
    Ok(tls)
}

/// Established connection owned by its I/O thread.
pub struct ActiveConnection {
    stream: TlsStream<TcpStream>,
}

/// What the I/O thread observed when probing for inbound data.
#[derive(Debug)]
pub enum Probe {
    /// Nothing happened within the poll window.
    Idle,
    /// The peer closed the stream.
    Closed,
}

impl ActiveConnection {
    /// Wrap `stream`, reading with a short `poll` window so the owner can
    /// interleave writes with close detection.
    pub fn new(stream: TlsStream<TcpStream>, poll: Duration) -> io::Result<Self> {
        stream.get_ref().set_read_timeout(Some(poll))?;
        Ok(Self { stream })
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)?;
        self.stream.flush()
    }

    /// Read and discard inbound bytes, reporting a close.
    pub fn probe(&mut self) -> io::Result<Probe> {
        let mut scratch = [0u8; 512];
        match self.stream.read(&mut scratch) {
            Ok(0) => Ok(Probe::Closed),
            Ok(_) => Ok(Probe::Idle),
            Err(err) if is_timeout_kind(err.kind()) || err.kind() == io::ErrorKind::Interrupted => {
                Ok(Probe::Idle)
            }
            Err(err) => Err(err),
        }
    }

    /// Tear the connection down without waiting for the peer.
    pub fn destroy(mut self) {
        let _ = self.stream.shutdown();
        let _ = self.stream.get_ref().shutdown(std::net::Shutdown::Both);
    }
}
