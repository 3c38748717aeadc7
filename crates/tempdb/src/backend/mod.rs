//! Storage backend used by the ephemeral store
//!
//! The facade only needs a handful of Redis commands. They sit behind
//! [`StoreBackend`] so the read-once logic can be exercised without a server.

mod reaper;
mod redis_backend;
#[cfg(test)]
mod testing;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TempdbError;

pub use self::redis_backend::RedisBackend;

/// Expiration attached to a SET.
///
/// Whole seconds go out as `EX`, anything finer as `PX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    Seconds(u64),
    Milliseconds(u64),
}

impl Expiry {
    /// `None` and a zero duration both mean the entry never expires.
    pub fn from_ttl(ttl: Option<Duration>) -> Self {
        match ttl {
            None => Expiry::Never,
            Some(ttl) if ttl.is_zero() => Expiry::Never,
            Some(ttl) if ttl.subsec_nanos() == 0 => Expiry::Seconds(ttl.as_secs()),
            Some(ttl) => {
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
                Expiry::Milliseconds(millis.max(1))
            }
        }
    }

    /// The SET option and its argument, if any.
    pub fn as_arg(&self) -> Option<(&'static str, u64)> {
        match *self {
            Expiry::Never => None,
            Expiry::Seconds(secs) => Some(("EX", secs)),
            Expiry::Milliseconds(millis) => Some(("PX", millis)),
        }
    }
}

/// Redis commands issued by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Set,
    Get,
    Del,
    GetDel,
    Ping,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set => "SET",
            Command::Get => "GET",
            Command::Del => "DEL",
            Command::GetDel => "GETDEL",
            Command::Ping => "PING",
        }
    }

    /// Commands that modify data are bound by the write timeout
    pub fn is_write(&self) -> bool {
        matches!(self, Command::Set | Command::Del)
    }

    /// Sending the command twice leaves the same result as sending it once.
    /// `GETDEL` is not: a repeat after a lost reply finds the key already gone.
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, Command::GetDel)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw key/value commands against already-namespaced keys.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn set(&self, key: &str, value: &str, expiry: Expiry) -> Result<(), TempdbError>;

    /// `Ok(None)` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<String>, TempdbError>;

    /// Returns the number of keys removed
    async fn del(&self, key: &str) -> Result<i64, TempdbError>;

    /// Read and remove the key in one step (Redis 6.2+)
    async fn get_del(&self, key: &str) -> Result<Option<String>, TempdbError>;

    async fn ping(&self) -> Result<(), TempdbError>;
}
