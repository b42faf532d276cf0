//! Ingestion run tracker
//!
//! Runs move `running -> completed` or `running -> failed`, once. The closing
//! update is conditional on the row still being `running`, so a second close
//! (from this process or another) matches no row and is rejected instead of
//! overwriting the first outcome.
//!
//! Stale `running` rows are reported, never closed here: another process may
//! still own them.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use spr_common::db::{retry_on_lock, LockStats, RetryPolicy};
use spr_common::{time, uuid_utils, Error, Result};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{IngestionRun, RunCounts, RunFilter, RunStatus, RunSummary};

const RUN_COLUMNS: &str = "id, source, start_time, end_time, status, records_processed, \
     records_inserted, records_updated, records_failed, error_message";

#[derive(Clone)]
pub struct RunTracker {
    db: SqlitePool,
    retry: RetryPolicy,
}

impl RunTracker {
    pub fn new(db: SqlitePool, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }

    /// Same tracker, counting lock waits into `stats`
    pub fn with_lock_stats(&self, stats: LockStats) -> Self {
        Self {
            db: self.db.clone(),
            retry: self.retry.clone().with_stats(stats),
        }
    }

    /// Open a new `running` run for `source`
    pub async fn begin(&self, source: &str) -> Result<Uuid> {
        if source.trim().is_empty() {
            return Err(Error::InvalidInput("source must not be empty".to_string()));
        }

        let run_id = uuid_utils::generate();
        let id = run_id.to_string();
        let start_time = time::to_storage(&time::now());

        retry_on_lock("runs::begin", &self.retry, || async {
            sqlx::query(
                r#"
                INSERT INTO ingestion_runs (id, source, start_time, status)
                VALUES (?, ?, ?, 'running')
                "#,
            )
            .bind(&id)
            .bind(source)
            .bind(&start_time)
            .execute(&self.db)
            .await?;
            Ok::<_, Error>(())
        })
        .await?;

        info!(run_id = %run_id, source = source, "Ingestion run started");
        Ok(run_id)
    }

    /// Close a run as `completed` with its final counters
    pub async fn complete(&self, run_id: Uuid, counts: RunCounts) -> Result<IngestionRun> {
        let run = self.close(run_id, RunStatus::Completed, Some(counts), None).await?;
        info!(
            run_id = %run_id,
            source = %run.source,
            processed = counts.processed,
            inserted = counts.inserted,
            updated = counts.updated,
            failed = counts.failed,
            "Ingestion run completed"
        );
        Ok(run)
    }

    /// Close a run as `failed`
    ///
    /// Counters are overwritten only when given, so a run that dies before
    /// reporting keeps whatever was recorded.
    pub async fn fail(&self, run_id: Uuid, message: &str, counts: Option<RunCounts>) -> Result<IngestionRun> {
        let run = self.close(run_id, RunStatus::Failed, counts, Some(message)).await?;
        warn!(run_id = %run_id, source = %run.source, error = message, "Ingestion run failed");
        Ok(run)
    }

    async fn close(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: Option<RunCounts>,
        message: Option<&str>,
    ) -> Result<IngestionRun> {
        let id = run_id.to_string();
        let end_time = time::to_storage(&time::now());
        let counter = |f: fn(&RunCounts) -> u64| counts.as_ref().map(|c| f(c) as i64);

        let closed = retry_on_lock("runs::close", &self.retry, || async {
            let result = sqlx::query(
                r#"
                UPDATE ingestion_runs SET
                    status = ?,
                    end_time = ?,
                    records_processed = COALESCE(?, records_processed),
                    records_inserted = COALESCE(?, records_inserted),
                    records_updated = COALESCE(?, records_updated),
                    records_failed = COALESCE(?, records_failed),
                    error_message = ?
                WHERE id = ? AND status = 'running'
                "#,
            )
            .bind(status.as_str())
            .bind(&end_time)
            .bind(counter(|c| c.processed))
            .bind(counter(|c| c.inserted))
            .bind(counter(|c| c.updated))
            .bind(counter(|c| c.failed))
            .bind(message)
            .bind(&id)
            .execute(&self.db)
            .await?;
            Ok::<_, Error>(result.rows_affected() > 0)
        })
        .await?;

        let run = self
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Ingestion run {} not found", run_id)))?;

        if !closed {
            return Err(Error::InvalidTransition {
                run_id: id,
                current: run.status.as_str().to_string(),
            });
        }
        Ok(run)
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<IngestionRun>> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM ingestion_runs WHERE id = ?"))
            .bind(run_id.to_string())
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(row_to_run).transpose()
    }

    /// Runs matching `filter`, newest first
    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<IngestionRun>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM ingestion_runs
            WHERE (?1 IS NULL OR source = ?1)
              AND (?2 IS NULL OR status = ?2)
              AND (?3 IS NULL OR start_time >= ?3)
              AND (?4 IS NULL OR start_time < ?4)
            ORDER BY start_time DESC, id
            LIMIT ?5
            "#
        ))
        .bind(filter.source.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.started_after.as_ref().map(time::to_storage))
        .bind(filter.started_before.as_ref().map(time::to_storage))
        .bind(filter.limit.map(i64::from).unwrap_or(-1))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_run).collect()
    }

    /// `running` runs started more than `window` ago, oldest first
    pub async fn stale_runs(&self, window: Duration) -> Result<Vec<IngestionRun>> {
        let cutoff = time::to_storage(&(time::now() - window));
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM ingestion_runs
            WHERE status = 'running' AND start_time < ?
            ORDER BY start_time
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.db)
        .await?;

        let runs: Vec<IngestionRun> = rows.iter().map(row_to_run).collect::<Result<_>>()?;
        for run in &runs {
            warn!(run_id = %run.id, source = %run.source, started = %run.start_time, "Stale ingestion run");
        }
        Ok(runs)
    }

    /// Per-source aggregate of runs started since `since`
    pub async fn summary(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RunSummary>> {
        let runs = self
            .list_runs(&RunFilter {
                started_after: since,
                ..RunFilter::default()
            })
            .await?;

        let now = time::now();
        let mut by_source: BTreeMap<String, Vec<IngestionRun>> = BTreeMap::new();
        for run in runs {
            by_source.entry(run.source.clone()).or_default().push(run);
        }

        let summaries = by_source
            .into_iter()
            .filter_map(|(source, runs)| {
                let first_run = runs.iter().map(|r| r.start_time).min()?;
                let last_run = runs.iter().map(|r| r.start_time).max()?;
                let durations: Vec<i64> = runs
                    .iter()
                    .filter(|r| r.status.is_terminal())
                    .map(|r| r.elapsed_ms(now))
                    .collect();
                let avg_duration_ms = if durations.is_empty() {
                    0.0
                } else {
                    durations.iter().sum::<i64>() as f64 / durations.len() as f64
                };

                Some(RunSummary {
                    runs: runs.len() as u64,
                    failures: runs.iter().filter(|r| r.status == RunStatus::Failed).count() as u64,
                    still_running: runs.iter().filter(|r| r.status == RunStatus::Running).count() as u64,
                    records_inserted: runs.iter().map(|r| r.counts.inserted).sum(),
                    records_updated: runs.iter().map(|r| r.counts.updated).sum(),
                    records_failed: runs.iter().map(|r| r.counts.failed).sum(),
                    avg_duration_ms,
                    max_duration_ms: durations.iter().copied().max().unwrap_or(0),
                    first_run,
                    last_run,
                    source,
                })
            })
            .collect();

        Ok(summaries)
    }
}

fn row_to_run(row: &SqliteRow) -> Result<IngestionRun> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let start_time: String = row.try_get("start_time")?;
    let end_time: Option<String> = row.try_get("end_time")?;
    let count = |column: &str| -> Result<u64> { Ok(row.try_get::<i64, _>(column)?.max(0) as u64) };

    Ok(IngestionRun {
        id: uuid_utils::parse(&id)?,
        source: row.try_get("source")?,
        start_time: time::from_storage(&start_time)?,
        end_time: end_time.as_deref().map(time::from_storage).transpose()?,
        status: status.parse()?,
        counts: RunCounts {
            processed: count("records_processed")?,
            inserted: count("records_inserted")?,
            updated: count("records_updated")?,
            failed: count("records_failed")?,
        },
        error_message: row.try_get("error_message")?,
    })
}
