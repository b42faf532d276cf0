//! Database Retry Logic
//!
//! Exponential backoff retry for transient lock errors. SQLite's busy_timeout
//! bounds a single statement; this bounds the whole operation and surfaces
//! exhaustion as [`Error::Contention`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::is_lock_error;
use crate::{Error, Result};

/// Shared counter of lock waits (one per retried attempt)
///
/// A child counter also adds every wait to its parent, so a per-run count
/// and the process-wide total stay in step.
#[derive(Debug, Clone, Default)]
pub struct LockStats {
    waits: Arc<AtomicU64>,
    parent: Option<Arc<AtomicU64>>,
}

impl LockStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh counter starting at zero that also feeds this one
    pub fn child(&self) -> Self {
        Self {
            waits: Arc::new(AtomicU64::new(0)),
            parent: Some(Arc::clone(&self.waits)),
        }
    }

    pub fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Total waits observed since creation
    pub fn total(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }
}

/// Bounded retry/backoff policy for storage access
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_wait: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub stats: LockStats,
}

impl RetryPolicy {
    /// Policy with the standard 10ms..1000ms backoff and the given total budget
    pub fn new(max_wait_ms: u64) -> Self {
        Self {
            max_wait: crate::time::millis_to_duration(max_wait_ms),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(1000),
            stats: LockStats::new(),
        }
    }

    pub fn with_stats(mut self, stats: LockStats) -> Self {
        self.stats = stats;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(8000)
    }
}

/// Retry a database operation with exponential backoff until the policy's
/// `max_wait` elapses.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If lock error (SQLITE_BUSY/SQLITE_LOCKED or pool timeout):
///    a. If time elapsed < max_wait: record a lock wait, log WARN, backoff, retry
///    b. Otherwise: log ERROR, return [`Error::Contention`]
/// 4. If other error: return error immediately (no retry)
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;
    let mut backoff = policy.initial_backoff;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying database operation");
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    let elapsed_ms = start_time.elapsed().as_millis();
                    if elapsed_ms > 2000 {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = elapsed_ms,
                            "Database operation succeeded after significant retry period (>2s)"
                        );
                    } else {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = elapsed_ms,
                            "Database operation succeeded after retry"
                        );
                    }
                }
                return Ok(result);
            }
            Err(err) => {
                let is_lock = matches!(&err, Error::Database(db_err) if is_lock_error(db_err));
                if !is_lock {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= policy.max_wait {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        max_wait_ms = policy.max_wait.as_millis(),
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Contention(format!(
                        "{}: database locked after {} attempts ({} ms elapsed, max {} ms)",
                        operation_name,
                        attempt,
                        elapsed.as_millis(),
                        policy.max_wait.as_millis()
                    )));
                }

                policy.stats.record_wait();
                let sleep_for = backoff
                    .min(policy.max_backoff)
                    .min(policy.max_wait.saturating_sub(elapsed).max(Duration::from_millis(1)));

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    elapsed_ms = elapsed.as_millis(),
                    backoff_ms = sleep_for.as_millis(),
                    "Database locked, will retry after backoff"
                );

                tokio::time::sleep(sleep_for).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }
}
