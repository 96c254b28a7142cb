//! Client configuration.
//!
//! [`ClientConfig`] carries every tunable of the forwarding client with the
//! defaults applications expect. Values can be set fluently from Rust or
//! loaded from the `[syslog]` section of an INI file:
//!
//! ```ini
//! [syslog]
//! host = logs.example.com
//! port = 6514
//! appname = billing
//! socket_timeout_ms = 15000
//! first_reconnect_time_ms = 2000
//! subsequent_reconnect_multiplier = 1.4
//! maximum_reconnect_time_ms = 15000
//! queue_overflow_limit = 1000000
//! tls_ca_file = /etc/ssl/collector.pem
//! ```

use std::{fmt, fs, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use ini::{Ini, Properties};

use crate::{
    client::BackoffPolicy,
    console::{ConsoleSink, SharedConsole},
    error::ClientError,
    overflow::{ExitHook, OverflowSink},
};

/// Default idle timeout applied while a connection is being established.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_millis(15_000);
/// Default byte budget of the message queue.
pub const DEFAULT_QUEUE_OVERFLOW_LIMIT: usize = 1_000_000;
/// Default application name stamped on records.
pub const DEFAULT_APPNAME: &str = "app";
/// INI section holding the client settings.
pub const INI_SECTION: &str = "syslog";

/// TLS options passed through to the transport.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    /// Name used for SNI and certificate validation; defaults to the host.
    pub domain: Option<String>,
    /// Extra PEM-encoded trust anchors.
    pub root_certificates: Vec<Vec<u8>>,
    /// Trust only `root_certificates`.
    pub disable_built_in_roots: bool,
    /// Skip certificate and host name validation (intended for tests).
    pub insecure_skip_verify: bool,
}

impl TlsOptions {
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Trust the PEM-encoded certificate in addition to the system roots.
    pub fn with_root_certificate(mut self, pem: Vec<u8>) -> Self {
        self.root_certificates.push(pem);
        self
    }

    pub fn with_insecure_skip_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_verify = insecure;
        self
    }

    pub fn with_built_in_roots(mut self, enabled: bool) -> Self {
        self.disable_built_in_roots = !enabled;
        self
    }
}

/// Configuration consumed by [`SyslogClient::connect`](crate::SyslogClient::connect).
#[derive(Clone)]
pub struct ClientConfig {
    pub appname: String,
    /// Host name stamped on records; the OS host name when unset.
    pub hostname: Option<String>,
    /// Process id stamped on records; the current process when unset.
    pub procid: Option<u32>,
    /// Echo every line to the console as well.
    pub also_log_to_console: bool,
    /// Report internal state changes on the console.
    pub debug: bool,
    /// Suppress normal `[syslog]` diagnostics.
    pub quiet: bool,
    pub console: SharedConsole,
    pub tls: TlsOptions,
    /// Idle timeout while connecting; zero disables it.
    pub socket_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Queue byte count at which the overflow sink is invoked.
    pub queue_overflow_limit: usize,
    /// Custom overflow sink; a [`FileOverflowSink`](crate::FileOverflowSink)
    /// when unset.
    pub overflow_sink: Option<Arc<dyn OverflowSink>>,
    /// Prefix of the default overflow files; `"<appname>-"` when unset.
    pub log_prefix: Option<String>,
    /// Directory receiving the default overflow files; the working directory
    /// when unset.
    pub overflow_directory: Option<PathBuf>,
    /// Hand pending lines to the exit hook on shutdown.
    pub install_exit_handler: bool,
    /// Custom exit hook; forwards to the overflow sink when unset.
    pub exit_hook: Option<Arc<dyn ExitHook>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            appname: DEFAULT_APPNAME.into(),
            hostname: None,
            procid: None,
            also_log_to_console: false,
            debug: false,
            quiet: false,
            console: SharedConsole::default(),
            tls: TlsOptions::default(),
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            backoff: BackoffPolicy::default(),
            queue_overflow_limit: DEFAULT_QUEUE_OVERFLOW_LIMIT,
            overflow_sink: None,
            log_prefix: None,
            overflow_directory: None,
            install_exit_handler: true,
            exit_hook: None,
        }
    }
}

macro_rules! setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = value;
            self
        }
    };
}

macro_rules! ensure {
    ($cond:expr, $($msg:tt)+) => {
        if !$cond {
            return Err(ClientError::InvalidConfig(format!($($msg)+)));
        }
    };
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_appname(mut self, appname: impl Into<String>) -> Self {
        self.appname = appname.into();
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_procid(mut self, procid: u32) -> Self {
        self.procid = Some(procid);
        self
    }

    setter!(with_also_log_to_console, also_log_to_console, bool);
    setter!(with_debug, debug, bool);
    setter!(with_quiet, quiet, bool);
    setter!(with_tls, tls, TlsOptions);
    setter!(
        #[doc = "Set the idle timeout while connecting; zero disables it."]
        with_socket_timeout,
        socket_timeout,
        Duration
    );
    setter!(with_backoff, backoff, BackoffPolicy);
    setter!(with_queue_overflow_limit, queue_overflow_limit, usize);
    setter!(with_install_exit_handler, install_exit_handler, bool);

    /// Route console diagnostics to `console`.
    pub fn with_console<C>(mut self, console: C) -> Self
    where
        C: ConsoleSink + 'static,
    {
        self.console = SharedConsole::new(console);
        self
    }

    pub fn with_overflow_sink<S>(mut self, sink: S) -> Self
    where
        S: OverflowSink + 'static,
    {
        self.overflow_sink = Some(Arc::new(sink));
        self
    }

    pub fn with_exit_hook<H>(mut self, hook: H) -> Self
    where
        H: ExitHook + 'static,
    {
        self.exit_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = Some(prefix.into());
        self
    }

    pub fn with_overflow_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.overflow_directory = Some(directory.into());
        self
    }

    /// Prefix used by the default overflow sink.
    pub fn effective_log_prefix(&self) -> String {
        self.log_prefix
            .clone()
            .unwrap_or_else(|| format!("{}-", self.appname))
    }

    /// Host name stamped on records.
    pub fn effective_hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
                .unwrap_or_else(|| "localhost".into())
        })
    }

    pub fn effective_procid(&self) -> u32 {
        self.procid.unwrap_or_else(std::process::id)
    }

    /// Idle timeout, or `None` when disabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (!self.socket_timeout.is_zero()).then_some(self.socket_timeout)
    }

    /// Check the values that cannot be retried around.
    pub fn validate(&self) -> Result<(), ClientError> {
        let backoff = &self.backoff;
        ensure!(
            !backoff.first.is_zero(),
            "first_reconnect_time must be greater than zero"
        );
        ensure!(
            backoff.multiplier.is_finite() && backoff.multiplier >= 1.0,
            "subsequent_reconnect_multiplier must be a finite value of at least 1.0, got {}",
            backoff.multiplier
        );
        ensure!(
            backoff.maximum >= backoff.first,
            "maximum_reconnect_time must not be below first_reconnect_time"
        );
        ensure!(
            self.queue_overflow_limit > 0,
            "queue_overflow_limit must be greater than zero"
        );
        ensure!(!self.appname.is_empty(), "appname must not be empty");
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("appname", &self.appname)
            .field("hostname", &self.hostname)
            .field("procid", &self.procid)
            .field("also_log_to_console", &self.also_log_to_console)
            .field("debug", &self.debug)
            .field("quiet", &self.quiet)
            .field("tls", &self.tls)
            .field("socket_timeout", &self.socket_timeout)
            .field("backoff", &self.backoff)
            .field("queue_overflow_limit", &self.queue_overflow_limit)
            .field("custom_overflow_sink", &self.overflow_sink.is_some())
            .field("log_prefix", &self.log_prefix)
            .field("overflow_directory", &self.overflow_directory)
            .field("install_exit_handler", &self.install_exit_handler)
            .field("custom_exit_hook", &self.exit_hook.is_some())
            .finish()
    }
}

/// Target address plus configuration, as loaded from a file.
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub config: ClientConfig,
}

impl ClientSettings {
    /// Read settings from the `[syslog]` section of the INI file at `path`.
    pub fn from_ini_file(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let text = fs::read_to_string(&path)?;
        Self::from_ini_str(&text)
    }

    /// Parse settings from INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ClientError> {
        let ini = Ini::load_from_str(text)?;
        let section = ini.section(Some(INI_SECTION)).ok_or_else(|| {
            ClientError::InvalidConfig(format!("missing [{INI_SECTION}] section"))
        })?;
        let host = section
            .get("host")
            .ok_or_else(|| ClientError::InvalidConfig("host is required".into()))?
            .to_owned();
        let port = parse_required(section, "port")?;
        let config = config_from_section(section)?;
        config.validate()?;
        Ok(Self { host, port, config })
    }
}

fn parse_value<T>(section: &Properties, key: &str) -> Result<Option<T>, ClientError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    section
        .get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|err| ClientError::InvalidConfig(format!("{key}: {err}")))
        })
        .transpose()
}

fn parse_required<T>(section: &Properties, key: &str) -> Result<T, ClientError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    parse_value(section, key)?
        .ok_or_else(|| ClientError::InvalidConfig(format!("{key} is required")))
}

fn parse_millis(section: &Properties, key: &str) -> Result<Option<Duration>, ClientError> {
    Ok(parse_value::<u64>(section, key)?.map(Duration::from_millis))
}

fn config_from_section(section: &Properties) -> Result<ClientConfig, ClientError> {
    let mut config = ClientConfig::default();
    if let Some(appname) = section.get("appname") {
        config.appname = appname.to_owned();
    }
    config.hostname = section.get("hostname").map(str::to_owned);
    config.procid = parse_value(section, "procid")?;
    if let Some(value) = parse_value(section, "also_log_to_console")? {
        config.also_log_to_console = value;
    }
    if let Some(value) = parse_value(section, "debug")? {
        config.debug = value;
    }
    if let Some(value) = parse_value(section, "quiet")? {
        config.quiet = value;
    }
    if let Some(value) = parse_millis(section, "socket_timeout_ms")? {
        config.socket_timeout = value;
    }
    if let Some(value) = parse_millis(section, "first_reconnect_time_ms")? {
        config.backoff.first = value;
    }
    if let Some(value) = parse_value(section, "subsequent_reconnect_multiplier")? {
        config.backoff.multiplier = value;
    }
    if let Some(value) = parse_millis(section, "maximum_reconnect_time_ms")? {
        config.backoff.maximum = value;
    }
    if let Some(value) = parse_value(section, "queue_overflow_limit")? {
        config.queue_overflow_limit = value;
    }
    config.log_prefix = section.get("log_prefix").map(str::to_owned);
    if let Some(dir) = section.get("overflow_directory") {
        config.overflow_directory = Some(PathBuf::from(dir));
    }
    if let Some(value) = parse_value(section, "install_exit_handler")? {
        config.install_exit_handler = value;
    }
    config.tls = tls_from_section(section)?;
    Ok(config)
}

fn tls_from_section(section: &Properties) -> Result<TlsOptions, ClientError> {
    let mut tls = TlsOptions {
        domain: section.get("tls_domain").map(str::to_owned),
        ..TlsOptions::default()
    };
    if let Some(path) = section.get("tls_ca_file") {
        tls.root_certificates.push(fs::read(path)?);
    }
    if let Some(value) = parse_value(section, "tls_insecure_skip_verify")? {
        tls.insecure_skip_verify = value;
    }
    if let Some(value) = parse_value::<bool>(section, "tls_built_in_roots")? {
        tls.disable_built_in_roots = !value;
    }
    Ok(tls)
}
