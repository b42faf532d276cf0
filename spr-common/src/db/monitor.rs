//! Monitored transactions
//!
//! Multi-statement write paths (the resolver's compare-and-swap) hold a pool
//! connection for the whole transaction. These wrappers log how long the
//! connection took to get and how long it was held.

use sqlx::{Sqlite, SqlitePool, Transaction};
use std::time::Instant;

use crate::Result;

/// Acquisition slower than this is logged at WARN
pub const SLOW_ACQUIRE_MS: u128 = 1000;

/// Transactions held longer than this are logged at WARN
pub const LONG_TRANSACTION_MS: u128 = 2000;

/// Transaction that reports its hold time on commit, rollback or drop
pub struct MonitoredTransaction<'c> {
    tx: Option<Transaction<'c, Sqlite>>,
    caller: &'static str,
    acquired_at: Instant,
}

impl<'c> MonitoredTransaction<'c> {
    pub async fn commit(mut self) -> Result<()> {
        let tx = self.tx.take().expect("Transaction already consumed");
        tx.commit().await?;
        self.log_release("commit");
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        let tx = self.tx.take().expect("Transaction already consumed");
        tx.rollback().await?;
        self.log_release("rollback");
        Ok(())
    }

    /// Inner transaction, for `&mut **tx.inner_mut()` executors
    pub fn inner_mut(&mut self) -> &mut Transaction<'c, Sqlite> {
        self.tx.as_mut().expect("Transaction already consumed")
    }

    /// Milliseconds since the connection was acquired
    pub fn held_ms(&self) -> u128 {
        self.acquired_at.elapsed().as_millis()
    }

    fn log_release(&self, how: &'static str) {
        let held_ms = self.held_ms();
        if held_ms > LONG_TRANSACTION_MS {
            tracing::warn!(caller = self.caller, held_ms, release = how, "LONG TRANSACTION - connection held for extended period");
        } else {
            tracing::debug!(caller = self.caller, held_ms, release = how, "Connection released");
        }
    }
}

impl<'c> Drop for MonitoredTransaction<'c> {
    fn drop(&mut self) {
        // Still holding a transaction here means an early return; sqlx rolls it back
        if self.tx.is_some() {
            self.log_release("drop");
        }
    }
}

/// Begin a transaction on `pool`, logging acquisition wait under `caller`
///
/// ```ignore
/// let mut tx = begin_monitored(&pool, "resolver::write").await?;
/// sqlx::query("...").execute(&mut **tx.inner_mut()).await?;
/// tx.commit().await?;
/// ```
pub async fn begin_monitored<'c>(pool: &'c SqlitePool, caller: &'static str) -> Result<MonitoredTransaction<'c>> {
    let start = Instant::now();
    let tx = pool.begin().await?;

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > SLOW_ACQUIRE_MS {
        tracing::warn!(caller, wait_ms, "SLOW CONNECTION ACQUISITION - pool may be saturated");
    } else {
        tracing::debug!(caller, wait_ms, "Connection acquired");
    }

    Ok(MonitoredTransaction {
        tx: Some(tx),
        caller,
        acquired_at: Instant::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        // One connection: every in-memory connection is its own database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (v INTEGER)").execute(&pool).await.unwrap();

        let mut tx = begin_monitored(&pool, "test::rollback").await.unwrap();
        sqlx::query("INSERT INTO t (v) VALUES (1)")
            .execute(&mut **tx.inner_mut())
            .await
            .unwrap();
        assert!(tx.held_ms() < LONG_TRANSACTION_MS);
        tx.rollback().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 0);
    }
}
