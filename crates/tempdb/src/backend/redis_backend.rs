//! Redis implementation of [`StoreBackend`] on top of a deadpool connection pool

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Hook, HookError, Manager, Pool, Runtime};
use redis::{AsyncCommands, RedisResult};
use tokio_util::sync::DropGuard;
use tracing::{debug, error, info, warn};

use super::{reaper, Command, Expiry, StoreBackend};
use crate::config::{TempdbOptions, DEFAULT_IDLE_CHECK_FREQUENCY};
use crate::error::TempdbError;

/// Pooled Redis connections plus the per-command limits from [`TempdbOptions`].
///
/// Cloning is cheap and every clone shares the same pool.
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    max_retries: u32,
    _reaper: Option<Arc<DropGuard>>,
}

impl RedisBackend {
    /// Build the connection pool. No connection is opened until the first
    /// command; unreachable servers surface as errors on use.
    pub fn new(options: &TempdbOptions) -> Result<Self, TempdbError> {
        options.validate()?;

        let connection_info = options.connection_info()?;
        debug!("Creating Redis pool for {:?}", connection_info.addr);

        let manager = Manager::new(connection_info)?;

        let mut builder = Pool::builder(manager)
            .config(options.pool_config())
            .runtime(Runtime::Tokio1);

        if options.read_only.unwrap_or(false) {
            builder = builder.post_create(Hook::async_fn(|conn, _| {
                Box::pin(async move {
                    redis::cmd("READONLY")
                        .query_async::<()>(conn)
                        .await
                        .map_err(HookError::Backend)?;
                    Ok(())
                })
            }));
        }

        let pool = builder.build().map_err(|e| {
            error!("Failed to build Redis pool: {}", e);
            TempdbError::Config(format!("failed to build connection pool: {}", e))
        })?;

        let reaper = match options.idle_timeout {
            Some(idle_timeout) => {
                let frequency = options
                    .idle_check_frequency
                    .unwrap_or(DEFAULT_IDLE_CHECK_FREQUENCY);
                Some(Arc::new(reaper::spawn(pool.clone(), idle_timeout, frequency)?))
            }
            None => None,
        };

        info!(
            "Redis pool ready (max_size={}, idle_timeout={:?})",
            pool.status().max_size,
            options.idle_timeout
        );

        Ok(Self {
            pool,
            read_timeout: options.read_timeout,
            write_timeout: options.write_timeout,
            max_retries: options.max_retries.unwrap_or(0),
            _reaper: reaper,
        })
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn timeout_for(&self, command: Command) -> Option<Duration> {
        if command.is_write() {
            self.write_timeout
        } else {
            self.read_timeout
        }
    }

    /// Run `run` on a pooled connection, retrying transient failures up to
    /// `max_retries` times.
    ///
    /// A command that is not idempotent is only retried when no connection
    /// could be checked out, since it was never sent.
    async fn execute<T, F, Fut>(
        &self,
        command: Command,
        key: &str,
        mut run: F,
    ) -> Result<T, TempdbError>
    where
        F: FnMut(Connection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match self.try_execute(command, &mut run).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && may_retry(command, &e) => {
                    attempt += 1;
                    warn!(
                        "Redis {} {} failed, retrying ({}/{}): {}",
                        command, key, attempt, self.max_retries, e
                    );
                }
                Err(e) => {
                    error!("Redis {} {} failed: {}", command, key, e);
                    return Err(e);
                }
            }
        }
    }

    async fn try_execute<T, F, Fut>(&self, command: Command, run: &mut F) -> Result<T, TempdbError>
    where
        F: FnMut(Connection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.pool.get().await?;
        let pending = run(conn);

        let result = match self.timeout_for(command) {
            Some(after) => tokio::time::timeout(after, pending)
                .await
                .map_err(|_| TempdbError::Timeout {
                    operation: command.name(),
                    after,
                })?,
            None => pending.await,
        };

        Ok(result?)
    }
}

fn may_retry(command: Command, err: &TempdbError) -> bool {
    if !err.is_transient() {
        return false;
    }
    command.is_idempotent() || matches!(err, TempdbError::Pool(_))
}

#[async_trait]
impl StoreBackend for RedisBackend {
    async fn set(&self, key: &str, value: &str, expiry: Expiry) -> Result<(), TempdbError> {
        debug!("Redis SET {} {:?}", key, expiry);

        self.execute(Command::Set, key, move |mut conn| {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some((option, amount)) = expiry.as_arg() {
                cmd.arg(option).arg(amount);
            }
            async move { cmd.query_async::<()>(&mut conn).await }
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, TempdbError> {
        debug!("Redis GET {}", key);

        self.execute(Command::Get, key, move |mut conn| async move {
            conn.get::<_, Option<String>>(key).await
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<i64, TempdbError> {
        debug!("Redis DEL {}", key);

        self.execute(Command::Del, key, move |mut conn| async move {
            conn.del::<_, i64>(key).await
        })
        .await
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, TempdbError> {
        debug!("Redis GETDEL {}", key);

        self.execute(Command::GetDel, key, move |mut conn| async move {
            redis::cmd("GETDEL")
                .arg(key)
                .query_async::<Option<String>>(&mut conn)
                .await
        })
        .await
    }

    async fn ping(&self) -> Result<(), TempdbError> {
        self.execute(Command::Ping, "", move |mut conn| async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await?;
        Ok(())
    }
}
