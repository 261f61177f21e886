//! Configuration surface: [`ConnectionConfig`] describes one FTP target,
//! [`PoolConfig`] describes the pool's sizing and eviction policy. Both are
//! immutable once built, following the teacher's validating-builder idiom
//! (`bb8::Builder`) rather than exposing public mutable fields.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, ErrorKind};

/// FTP data-channel transfer representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Ascii,
    Binary,
}

/// How (and whether) TLS is negotiated with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    None,
    Implicit,
    Explicit,
}

/// Proxy protocol used to reach the FTP server, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    None,
    Http,
    Socks4,
    Socks5,
}

/// Secret wrapper that never derives `Debug`/`Display` verbatim, so a
/// password can't leak into a log line or panic message by accident.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// Borrow the plain value for the duration of a single login. Callers
    /// must not retain the returned `&str` beyond that use.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret(value.to_string())
    }
}

/// Immutable configuration for a single `{host, port, credentials}` FTP
/// target. Built via [`ConnectionConfigBuilder`] or [`ConnectionConfig::from_properties`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Secret,
    pub connect_timeout: Duration,
    pub data_timeout: Duration,
    pub control_timeout: Duration,
    pub active_mode: bool,
    pub active_port_range: Option<(u16, u16)>,
    pub active_external_ip: Option<String>,
    pub transfer_mode: TransferMode,
    pub control_encoding: String,
    pub buffer_size: usize,
    pub keep_alive_interval: Duration,
    pub connection_idle_timeout: Duration,
    pub min_connections: u32,
    pub max_connections: u32,
    pub tls_mode: TlsMode,
    pub validate_server_cert: bool,
    pub truststore: Option<Vec<u8>>,
    pub enabled_protocols: Vec<String>,
    pub enabled_cipher_suites: Vec<String>,
    pub proxy_type: ProxyType,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_user: Option<String>,
    pub proxy_password: Option<Secret>,
}

impl ConnectionConfig {
    pub fn builder(host: impl Into<String>, port: u16) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new(host, port)
    }

    /// Populates a config from an untyped key-value bag, as delivered by the
    /// host runtime. Unknown keys are ignored; a recognized key with a value
    /// that doesn't parse raises `ErrorKind::ValidationError`.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, Error> {
        let host = props
            .get("host")
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::ValidationError, "missing required property 'host'"))?;
        let port = parse_prop(props, "port", 21u16)?;
        let mut builder = ConnectionConfigBuilder::new(host, port);

        if let Some(v) = props.get("username") {
            builder = builder.username(v.clone());
        }
        if let Some(v) = props.get("password") {
            builder = builder.password(v.clone());
        }
        if let Some(v) = props.get("connect-timeout-ms") {
            builder = builder.connect_timeout(Duration::from_millis(parse_u64(v)?));
        }
        if let Some(v) = props.get("data-timeout-ms") {
            builder = builder.data_timeout(Duration::from_millis(parse_u64(v)?));
        }
        if let Some(v) = props.get("control-timeout-ms") {
            builder = builder.control_timeout(Duration::from_millis(parse_u64(v)?));
        }
        if let Some(v) = props.get("active-mode") {
            builder = builder.active_mode(parse_bool(v)?);
        }
        if let Some(v) = props.get("transfer-mode") {
            builder = builder.transfer_mode(match v.to_ascii_uppercase().as_str() {
                "ASCII" => TransferMode::Ascii,
                "BINARY" => TransferMode::Binary,
                _ => {
                    return Err(Error::new(
                        ErrorKind::ValidationError,
                        format!("invalid transfer-mode '{v}'"),
                    ))
                }
            });
        }
        if let Some(v) = props.get("min-connections") {
            builder = builder.min_connections(parse_u32(v)?);
        }
        if let Some(v) = props.get("max-connections") {
            builder = builder.max_connections(parse_u32(v)?);
        }
        if let Some(v) = props.get("tls-mode") {
            builder = builder.tls_mode(match v.to_ascii_uppercase().as_str() {
                "NONE" => TlsMode::None,
                "IMPLICIT" => TlsMode::Implicit,
                "EXPLICIT" => TlsMode::Explicit,
                _ => {
                    return Err(Error::new(
                        ErrorKind::ValidationError,
                        format!("invalid tls-mode '{v}'"),
                    ))
                }
            });
        }

        builder.build()
    }
}

fn parse_u64(v: &str) -> Result<u64, Error> {
    v.parse()
        .map_err(|_| Error::new(ErrorKind::ValidationError, format!("invalid integer '{v}'")))
}

fn parse_u32(v: &str) -> Result<u32, Error> {
    v.parse()
        .map_err(|_| Error::new(ErrorKind::ValidationError, format!("invalid integer '{v}'")))
}

fn parse_bool(v: &str) -> Result<bool, Error> {
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::new(ErrorKind::ValidationError, format!("invalid boolean '{v}'"))),
    }
}

fn parse_prop(props: &HashMap<String, String>, key: &str, default: u16) -> Result<u16, Error> {
    match props.get(key) {
        Some(v) => v
            .parse()
            .map_err(|_| Error::new(ErrorKind::ValidationError, format!("invalid integer '{v}' for '{key}'"))),
        None => Ok(default),
    }
}

/// Validating builder for [`ConnectionConfig`], mirroring `bb8::Builder`'s
/// "assert on terminal build, not on every setter" shape but returning a
/// `Result` instead of panicking, since misconfiguration here is routinely
/// driven by untrusted external input rather than programmer error.
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    host: String,
    port: u16,
    username: String,
    password: Secret,
    connect_timeout: Duration,
    data_timeout: Duration,
    control_timeout: Duration,
    active_mode: bool,
    active_port_range: Option<(u16, u16)>,
    active_external_ip: Option<String>,
    transfer_mode: TransferMode,
    control_encoding: String,
    buffer_size: usize,
    keep_alive_interval: Duration,
    connection_idle_timeout: Duration,
    min_connections: u32,
    max_connections: u32,
    tls_mode: TlsMode,
    validate_server_cert: bool,
    truststore: Option<Vec<u8>>,
    enabled_protocols: Vec<String>,
    enabled_cipher_suites: Vec<String>,
    proxy_type: ProxyType,
    proxy_host: Option<String>,
    proxy_port: Option<u16>,
    proxy_user: Option<String>,
    proxy_password: Option<Secret>,
}

impl ConnectionConfigBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ConnectionConfigBuilder {
            host: host.into(),
            port,
            username: String::new(),
            password: Secret::new(""),
            connect_timeout: Duration::from_secs(30),
            data_timeout: Duration::from_secs(60),
            control_timeout: Duration::from_secs(30),
            active_mode: false,
            active_port_range: None,
            active_external_ip: None,
            transfer_mode: TransferMode::Binary,
            control_encoding: "UTF-8".to_string(),
            buffer_size: 64 * 1024,
            keep_alive_interval: Duration::from_secs(0),
            connection_idle_timeout: Duration::from_secs(0),
            min_connections: 0,
            max_connections: 8,
            tls_mode: TlsMode::None,
            validate_server_cert: true,
            truststore: None,
            enabled_protocols: Vec::new(),
            enabled_cipher_suites: Vec::new(),
            proxy_type: ProxyType::None,
            proxy_host: None,
            proxy_port: None,
            proxy_user: None,
            proxy_password: None,
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<Secret>) -> Self {
        self.password = password.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn data_timeout(mut self, timeout: Duration) -> Self {
        self.data_timeout = timeout;
        self
    }

    pub fn control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn active_mode(mut self, active: bool) -> Self {
        self.active_mode = active;
        self
    }

    pub fn active_port_range(mut self, start: u16, end: u16) -> Self {
        self.active_port_range = Some((start, end));
        self
    }

    pub fn active_external_ip(mut self, ip: impl Into<String>) -> Self {
        self.active_external_ip = Some(ip.into());
        self
    }

    pub fn transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = mode;
        self
    }

    pub fn control_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.control_encoding = encoding.into();
        self
    }

    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn connection_idle_timeout(mut self, timeout: Duration) -> Self {
        self.connection_idle_timeout = timeout;
        self
    }

    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = mode;
        self
    }

    pub fn validate_server_cert(mut self, validate: bool) -> Self {
        self.validate_server_cert = validate;
        self
    }

    pub fn truststore(mut self, bundle: Vec<u8>) -> Self {
        self.truststore = Some(bundle);
        self
    }

    pub fn enabled_protocols(mut self, protocols: Vec<String>) -> Self {
        self.enabled_protocols = protocols;
        self
    }

    pub fn enabled_cipher_suites(mut self, suites: Vec<String>) -> Self {
        self.enabled_cipher_suites = suites;
        self
    }

    pub fn proxy(
        mut self,
        kind: ProxyType,
        host: impl Into<String>,
        port: u16,
        user: Option<String>,
        password: Option<Secret>,
    ) -> Self {
        self.proxy_type = kind;
        self.proxy_host = Some(host.into());
        self.proxy_port = Some(port);
        self.proxy_user = user;
        self.proxy_password = password;
        self
    }

    pub fn build(self) -> Result<ConnectionConfig, Error> {
        if self.min_connections > self.max_connections {
            return Err(Error::new(
                ErrorKind::ValidationError,
                "min-connections must be <= max-connections",
            ));
        }
        if self.port == 0 {
            return Err(Error::new(ErrorKind::ValidationError, "port must be 1-65535"));
        }
        if let Some((start, end)) = self.active_port_range {
            if start > end {
                return Err(Error::new(
                    ErrorKind::ValidationError,
                    "active-port-range-start must be <= active-port-range-end",
                ));
            }
        }

        Ok(ConnectionConfig {
            host: self.host,
            port: self.port,
            username: self.username,
            password: self.password,
            connect_timeout: self.connect_timeout,
            data_timeout: self.data_timeout,
            control_timeout: self.control_timeout,
            active_mode: self.active_mode,
            active_port_range: self.active_port_range,
            active_external_ip: self.active_external_ip,
            transfer_mode: self.transfer_mode,
            control_encoding: self.control_encoding,
            buffer_size: self.buffer_size,
            keep_alive_interval: self.keep_alive_interval,
            connection_idle_timeout: self.connection_idle_timeout,
            min_connections: self.min_connections,
            max_connections: self.max_connections,
            tls_mode: self.tls_mode,
            validate_server_cert: self.validate_server_cert,
            truststore: self.truststore,
            enabled_protocols: self.enabled_protocols,
            enabled_cipher_suites: self.enabled_cipher_suites,
            proxy_type: self.proxy_type,
            proxy_host: self.proxy_host,
            proxy_port: self.proxy_port,
            proxy_user: self.proxy_user,
            proxy_password: self.proxy_password,
        })
    }
}

/// LIFO hands out the most-recently-returned connection first (better cache
/// locality on the server side); FIFO rotates evenly across connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    Lifo,
    Fifo,
}

/// Which idle connection to destroy first when `idle > max-idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Oldest,
    Lru,
    Mru,
    None,
}

/// Pool sizing, fairness, and eviction policy. Immutable once built.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_total: u32,
    pub max_idle: u32,
    pub min_idle: u32,
    pub max_wait: Option<Duration>,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
    pub test_while_idle: bool,
    pub eviction_run_interval: Duration,
    pub min_evictable_idle_time: Duration,
    pub ordering: Ordering,
    pub block_when_exhausted: bool,
    pub fair_wait: bool,
    pub eviction_policy: EvictionPolicy,
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfigBuilder {
    max_total: u32,
    max_idle: u32,
    min_idle: u32,
    max_wait: Option<Duration>,
    test_on_borrow: bool,
    test_on_return: bool,
    test_while_idle: bool,
    eviction_run_interval: Duration,
    min_evictable_idle_time: Duration,
    ordering: Ordering,
    block_when_exhausted: bool,
    fair_wait: bool,
    eviction_policy: EvictionPolicy,
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        PoolConfigBuilder {
            max_total: 8,
            max_idle: 8,
            min_idle: 0,
            max_wait: Some(Duration::from_secs(30)),
            test_on_borrow: true,
            test_on_return: false,
            test_while_idle: true,
            eviction_run_interval: Duration::from_secs(30),
            min_evictable_idle_time: Duration::from_secs(10 * 60),
            ordering: Ordering::Lifo,
            block_when_exhausted: true,
            fair_wait: false,
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

impl PoolConfigBuilder {
    pub fn max_total(mut self, n: u32) -> Self {
        self.max_total = n;
        self
    }

    pub fn max_idle(mut self, n: u32) -> Self {
        self.max_idle = n;
        self
    }

    pub fn min_idle(mut self, n: u32) -> Self {
        self.min_idle = n;
        self
    }

    /// `None` means wait forever; matches the spec's "max-wait ≤ 0 means
    /// wait forever" by mapping any non-positive duration to `None` here.
    pub fn max_wait(mut self, wait: Option<Duration>) -> Self {
        self.max_wait = wait.filter(|d| !d.is_zero());
        self
    }

    pub fn test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    pub fn test_on_return(mut self, enabled: bool) -> Self {
        self.test_on_return = enabled;
        self
    }

    pub fn test_while_idle(mut self, enabled: bool) -> Self {
        self.test_while_idle = enabled;
        self
    }

    pub fn eviction_run_interval(mut self, interval: Duration) -> Self {
        self.eviction_run_interval = interval;
        self
    }

    pub fn min_evictable_idle_time(mut self, duration: Duration) -> Self {
        self.min_evictable_idle_time = duration;
        self
    }

    pub fn ordering(mut self, ordering: Ordering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn block_when_exhausted(mut self, block: bool) -> Self {
        self.block_when_exhausted = block;
        self
    }

    pub fn fair_wait(mut self, fair: bool) -> Self {
        self.fair_wait = fair;
        self
    }

    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn build(self) -> Result<PoolConfig, Error> {
        if self.min_idle > self.max_idle {
            return Err(Error::new(ErrorKind::ValidationError, "min-idle must be <= max-idle"));
        }
        if self.max_idle > self.max_total {
            return Err(Error::new(ErrorKind::ValidationError, "max-idle must be <= max-total"));
        }
        if self.max_total == 0 {
            return Err(Error::new(ErrorKind::ValidationError, "max-total must be > 0"));
        }
        if (self.test_while_idle || !self.min_evictable_idle_time.is_zero())
            && self.eviction_run_interval.is_zero()
        {
            return Err(Error::new(
                ErrorKind::ValidationError,
                "eviction-run-interval must be > 0 when test-while-idle or idle-time eviction is desired",
            ));
        }

        Ok(PoolConfig {
            max_total: self.max_total,
            max_idle: self.max_idle,
            min_idle: self.min_idle,
            max_wait: self.max_wait,
            test_on_borrow: self.test_on_borrow,
            test_on_return: self.test_on_return,
            test_while_idle: self.test_while_idle,
            eviction_run_interval: self.eviction_run_interval,
            min_evictable_idle_time: self.min_evictable_idle_time,
            ordering: self.ordering,
            block_when_exhausted: self.block_when_exhausted,
            fair_wait: self.fair_wait,
            eviction_policy: self.eviction_policy,
        })
    }
}
