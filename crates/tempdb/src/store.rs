//! Read-once ephemeral store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, Instrument, Span};

use crate::backend::{Expiry, RedisBackend, StoreBackend};
use crate::config::TempdbOptions;
use crate::error::TempdbError;

/// Prefix applied to every key before it reaches Redis
pub const NAMESPACE: &str = "tempDB";

/// How `find` consumes an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadStrategy {
    /// One `GETDEL`: exactly one concurrent reader sees the value. Needs Redis 6.2+.
    #[default]
    Atomic,
    /// `GET` followed by `DEL`. Concurrent readers may both see the value,
    /// and a failed `DEL` is reported even though the value was read.
    GetThenDelete,
}

/// Write-once, read-once key/value capability.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Store `value` under `key`. A `ttl` of `None` or zero never expires.
    async fn insert(&self, key: &str, value: &str, ttl: Option<Duration>)
        -> Result<(), TempdbError>;

    /// Return the value stored under `key` and remove it.
    async fn find(&self, key: &str) -> Result<String, TempdbError>;
}

/// Namespaced, validated facade over a [`StoreBackend`].
pub struct Tempdb<B = RedisBackend> {
    backend: Arc<B>,
    strategy: ReadStrategy,
    span: Span,
}

impl<B> Clone for Tempdb<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            strategy: self.strategy,
            span: self.span.clone(),
        }
    }
}

impl Tempdb<RedisBackend> {
    /// Build a store backed by a Redis pool configured from `options`.
    ///
    /// The pool connects lazily, so this succeeds without a reachable server.
    pub fn new(options: TempdbOptions) -> Result<Self, TempdbError> {
        Ok(Self::with_backend(RedisBackend::new(&options)?))
    }

    /// Like [`Tempdb::new`], then checks the server answers `PING`.
    pub async fn connect(options: TempdbOptions) -> Result<Self, TempdbError> {
        let tempdb = Self::new(options)?;
        tempdb.ping().await?;
        Ok(tempdb)
    }
}

impl<B: StoreBackend> Tempdb<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            strategy: ReadStrategy::default(),
            span: tracing::debug_span!("tempdb"),
        }
    }

    pub fn with_read_strategy(mut self, strategy: ReadStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Span every operation of this store is recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn read_strategy(&self) -> ReadStrategy {
        self.strategy
    }

    /// The key as it is stored in Redis
    pub fn namespaced_key(key: &str) -> String {
        format!("{}:{}", NAMESPACE, key)
    }

    /// Insert a key/value pair with an optional expiration.
    pub async fn insert(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), TempdbError> {
        async {
            if key.is_empty() {
                debug!("Rejected insert without a key");
                return Err(TempdbError::KeyRequired);
            }
            if value.is_empty() {
                debug!("Rejected insert of {} without a value", key);
                return Err(TempdbError::ValueRequired);
            }

            let namespaced = Self::namespaced_key(key);
            self.backend
                .set(&namespaced, value, Expiry::from_ttl(ttl))
                .await
        }
        .instrument(self.span.clone())
        .await
    }

    /// Find the value for `key`, consuming it.
    pub async fn find(&self, key: &str) -> Result<String, TempdbError> {
        async {
            if key.is_empty() {
                debug!("Rejected find without a key");
                return Err(TempdbError::KeyRequired);
            }

            let namespaced = Self::namespaced_key(key);
            let value = match self.strategy {
                ReadStrategy::Atomic => self.backend.get_del(&namespaced).await?,
                ReadStrategy::GetThenDelete => {
                    let value = self.backend.get(&namespaced).await?;
                    if value.is_some() {
                        self.backend.del(&namespaced).await?;
                    }
                    value
                }
            };

            value.ok_or_else(|| {
                debug!("{} not found", namespaced);
                TempdbError::NotFound(key.to_string())
            })
        }
        .instrument(self.span.clone())
        .await
    }

    /// Round-trip to the server.
    pub async fn ping(&self) -> Result<(), TempdbError> {
        self.backend
            .ping()
            .instrument(self.span.clone())
            .await
    }
}

#[async_trait]
impl<B: StoreBackend> EphemeralStore for Tempdb<B> {
    async fn insert(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), TempdbError> {
        Tempdb::insert(self, key, value, ttl).await
    }

    async fn find(&self, key: &str) -> Result<String, TempdbError> {
        Tempdb::find(self, key).await
    }
}
