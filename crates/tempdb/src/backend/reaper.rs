//! Background eviction of idle pooled connections

use std::time::Duration;

use deadpool_redis::Pool;
use tokio::runtime::Handle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::error::TempdbError;

/// Spawn a task that closes connections idle for longer than `idle_timeout`,
/// checking every `frequency`. The task stops when the returned guard drops.
pub(crate) fn spawn(
    pool: Pool,
    idle_timeout: Duration,
    frequency: Duration,
) -> Result<DropGuard, TempdbError> {
    let handle = Handle::try_current().map_err(|_| {
        TempdbError::Config("idle_timeout requires a running Tokio runtime".to_string())
    })?;

    let token = CancellationToken::new();
    let cancelled = token.clone();

    handle.spawn(async move {
        let mut ticker = tokio::time::interval(frequency);
        // The first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!("Idle connection reaper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let before = pool.status().size;
                    pool.retain(|_, metrics| metrics.last_used() < idle_timeout);
                    let removed = before.saturating_sub(pool.status().size);
                    if removed > 0 {
                        debug!(
                            "Closed {} idle Redis connection(s) unused for {:?}",
                            removed, idle_timeout
                        );
                    }
                }
            }
        }
    });

    Ok(token.drop_guard())
}
