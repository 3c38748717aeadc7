//! Connection options for the Redis store backing tempdb
//!
//! Every option is optional. An option left as `None` falls back to the
//! default of the underlying client or pool, so an explicit zero is never
//! mistaken for "not configured".

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::PoolConfig;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::Deserialize;

use crate::error::TempdbError;

/// Address used when none is configured
pub const DEFAULT_ADDR: &str = "localhost:6379";
/// Default Redis port, used when an address omits it
pub const DEFAULT_PORT: u16 = 6379;
/// How often idle pooled connections are checked when only an idle timeout is set
pub const DEFAULT_IDLE_CHECK_FREQUENCY: Duration = Duration::from_secs(60);

/// Transport used to reach Redis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Unix,
}

impl FromStr for Network {
    type Err = TempdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Network::Tcp),
            "unix" => Ok(Network::Unix),
            other => Err(TempdbError::Config(format!(
                "unsupported network '{}', expected 'tcp' or 'unix'",
                other
            ))),
        }
    }
}

/// TLS settings for TCP connections
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TlsOptions {
    /// Accept any server certificate
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Overrides how the address of the Redis server is resolved.
///
/// When a dialer is set it replaces `network`, `addr` and `tls`. It runs
/// once, when the connection pool is built.
pub trait Dialer: Send + Sync {
    fn dial(&self) -> Result<ConnectionAddr, TempdbError>;
}

impl<F> Dialer for F
where
    F: Fn() -> ConnectionAddr + Send + Sync,
{
    fn dial(&self) -> Result<ConnectionAddr, TempdbError> {
        Ok(self())
    }
}

/// Tunable connection options for [`crate::Tempdb`].
///
/// Durations are read from configuration files as integer milliseconds.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TempdbOptions {
    pub network: Option<Network>,
    /// `host:port` for TCP, a socket path for Unix
    pub addr: Option<String>,
    #[serde(skip)]
    pub dialer: Option<Arc<dyn Dialer>>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: Option<i64>,
    /// Extra attempts for a command that failed with a transient I/O error
    pub max_retries: Option<u32>,
    #[serde(with = "duration_ms")]
    pub dial_timeout: Option<Duration>,
    #[serde(with = "duration_ms")]
    pub read_timeout: Option<Duration>,
    #[serde(with = "duration_ms")]
    pub write_timeout: Option<Duration>,
    pub pool_size: Option<usize>,
    /// How long to wait for a free pooled connection
    #[serde(with = "duration_ms")]
    pub pool_timeout: Option<Duration>,
    /// Pooled connections unused for longer than this are closed
    #[serde(with = "duration_ms")]
    pub idle_timeout: Option<Duration>,
    #[serde(with = "duration_ms")]
    pub idle_check_frequency: Option<Duration>,
    /// Send `READONLY` on every new connection (cluster replicas)
    pub read_only: Option<bool>,
    pub tls: Option<TlsOptions>,
}

impl TempdbOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create options from environment variables.
    ///
    /// Reads `TEMPDB_NETWORK`, `TEMPDB_ADDR`, `TEMPDB_USERNAME`,
    /// `TEMPDB_PASSWORD`, `TEMPDB_DB`, `TEMPDB_MAX_RETRIES`,
    /// `TEMPDB_DIAL_TIMEOUT_MS`, `TEMPDB_READ_TIMEOUT_MS`,
    /// `TEMPDB_WRITE_TIMEOUT_MS`, `TEMPDB_POOL_SIZE`, `TEMPDB_POOL_TIMEOUT_MS`,
    /// `TEMPDB_IDLE_TIMEOUT_MS`, `TEMPDB_IDLE_CHECK_FREQUENCY_MS`,
    /// `TEMPDB_READ_ONLY`, `TEMPDB_TLS` and `TEMPDB_TLS_INSECURE`.
    /// Values that fail to parse are ignored.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |name: &str| parse_var::<u64>(var(name)).map(Duration::from_millis);

        let tls = match parse_var(var("TEMPDB_TLS")) {
            Some(true) => Some(TlsOptions {
                insecure_skip_verify: parse_var(var("TEMPDB_TLS_INSECURE")).unwrap_or(false),
            }),
            _ => None,
        };

        Self {
            network: parse_var(var("TEMPDB_NETWORK")),
            addr: var("TEMPDB_ADDR"),
            dialer: None,
            username: var("TEMPDB_USERNAME"),
            password: var("TEMPDB_PASSWORD"),
            db: parse_var(var("TEMPDB_DB")),
            max_retries: parse_var(var("TEMPDB_MAX_RETRIES")),
            dial_timeout: millis("TEMPDB_DIAL_TIMEOUT_MS"),
            read_timeout: millis("TEMPDB_READ_TIMEOUT_MS"),
            write_timeout: millis("TEMPDB_WRITE_TIMEOUT_MS"),
            pool_size: parse_var(var("TEMPDB_POOL_SIZE")),
            pool_timeout: millis("TEMPDB_POOL_TIMEOUT_MS"),
            idle_timeout: millis("TEMPDB_IDLE_TIMEOUT_MS"),
            idle_check_frequency: millis("TEMPDB_IDLE_CHECK_FREQUENCY_MS"),
            read_only: parse_var(var("TEMPDB_READ_ONLY")),
            tls,
        }
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    pub fn with_dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Some(Arc::new(dialer));
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = Some(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    pub fn with_pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = Some(timeout);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn with_idle_check_frequency(mut self, frequency: Duration) -> Self {
        self.idle_check_frequency = Some(frequency);
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Reject explicit values the pool cannot work with.
    pub fn validate(&self) -> Result<(), TempdbError> {
        if self.pool_size == Some(0) {
            return Err(TempdbError::Config(
                "pool_size must be greater than zero".to_string(),
            ));
        }
        if self.idle_check_frequency == Some(Duration::ZERO) {
            return Err(TempdbError::Config(
                "idle_check_frequency must be greater than zero".to_string(),
            ));
        }
        if self.idle_timeout == Some(Duration::ZERO) {
            return Err(TempdbError::Config(
                "idle_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the address and credentials into the Redis client's form.
    pub fn connection_info(&self) -> Result<ConnectionInfo, TempdbError> {
        let addr = match &self.dialer {
            Some(dialer) => dialer.dial()?,
            None => self.resolve_addr()?,
        };

        Ok(ConnectionInfo {
            addr,
            redis: RedisConnectionInfo {
                db: self.db.unwrap_or(0),
                username: self.username.clone(),
                password: self.password.clone(),
                ..Default::default()
            },
        })
    }

    /// Pool sizing and timeouts. Unset options keep the pool defaults.
    pub fn pool_config(&self) -> PoolConfig {
        let mut config = PoolConfig::default();

        if let Some(size) = self.pool_size {
            config.max_size = size;
        }

        if let Some(timeout) = self.pool_timeout {
            config.timeouts.wait = Some(timeout);
        }

        if let Some(timeout) = self.dial_timeout {
            config.timeouts.create = Some(timeout);
            config.timeouts.recycle = Some(timeout);
        }

        config
    }

    fn resolve_addr(&self) -> Result<ConnectionAddr, TempdbError> {
        match self.network.unwrap_or_default() {
            Network::Tcp => {
                let (host, port) = parse_host_port(self.addr.as_deref().unwrap_or(DEFAULT_ADDR))?;
                Ok(match &self.tls {
                    Some(tls) => ConnectionAddr::TcpTls {
                        host,
                        port,
                        insecure: tls.insecure_skip_verify,
                        tls_params: None,
                    },
                    None => ConnectionAddr::Tcp(host, port),
                })
            }
            Network::Unix => {
                if self.tls.is_some() {
                    return Err(TempdbError::Config(
                        "TLS is only supported over tcp".to_string(),
                    ));
                }
                let path = self
                    .addr
                    .as_deref()
                    .filter(|path| !path.is_empty())
                    .ok_or_else(|| {
                        TempdbError::Config("unix network requires a socket path".to_string())
                    })?;
                Ok(ConnectionAddr::Unix(PathBuf::from(path)))
            }
        }
    }
}

impl fmt::Debug for TempdbOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempdbOptions")
            .field("network", &self.network)
            .field("addr", &self.addr)
            .field("dialer", &self.dialer.as_ref().map(|_| "<dialer>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("max_retries", &self.max_retries)
            .field("dial_timeout", &self.dial_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("pool_size", &self.pool_size)
            .field("pool_timeout", &self.pool_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("idle_check_frequency", &self.idle_check_frequency)
            .field("read_only", &self.read_only)
            .field("tls", &self.tls)
            .finish()
    }
}

fn parse_var<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|s| s.trim().parse().ok())
}

/// Split `host:port`, accepting bracketed IPv6 hosts and a missing port.
fn parse_host_port(addr: &str) -> Result<(String, u16), TempdbError> {
    let invalid = || TempdbError::Config(format!("invalid address '{}'", addr));

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => return Err(invalid()),
        }
    } else {
        match addr.rsplit_once(':') {
            // IPv6 hosts must be bracketed
            Some((host, _)) if host.contains(':') => return Err(invalid()),
            Some((host, port)) => (host, Some(port)),
            None => (addr, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }

    let port = match port {
        Some(port) => port.parse().map_err(|_| invalid())?,
        None => DEFAULT_PORT,
    };

    Ok((host.to_string(), port))
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
