//! Error types for tempdb

use std::time::Duration;

use deadpool_redis::PoolError;
use thiserror::Error;

/// Errors returned by the ephemeral store.
///
/// Validation failures (`KeyRequired`, `ValueRequired`) are produced locally
/// before any command is sent. Everything coming back from Redis or the
/// connection pool is passed through as-is.
#[derive(Error, Debug)]
pub enum TempdbError {
    #[error("a non-empty key is required")]
    KeyRequired,

    #[error("a non-empty value is required")]
    ValueRequired,

    /// Redis answered nil: the key never existed, already expired, or was
    /// already consumed by a previous find.
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Redis {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TempdbError {
    /// True when the key was absent from the store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TempdbError::NotFound(_))
    }

    /// True for errors raised by local input validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, TempdbError::KeyRequired | TempdbError::ValueRequired)
    }

    /// Whether a command that failed with this error may be attempted again
    /// under the `max_retries` setting.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            TempdbError::Redis(e) | TempdbError::Pool(PoolError::Backend(e)) => {
                e.kind() == redis::ErrorKind::IoError
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            }
            TempdbError::Pool(PoolError::Timeout(_)) => true,
            TempdbError::Timeout { .. } => true,
            _ => false,
        }
    }
}
