//! Performance telemetry
//!
//! Append-only and strictly observational: nothing in resolution reads it.
//! Also hosts the storage maintenance hook (WAL checkpoint) since the
//! decision to run it is made from the same storage numbers.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use spr_common::db::{retry_on_lock, RetryPolicy};
use spr_common::{time, uuid_utils, Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::{CheckpointResult, MetricSummary, PerformanceMetric, PerformanceSample, StorageFootprint};

#[derive(Clone)]
pub struct Telemetry {
    db: SqlitePool,
    retry: RetryPolicy,
    db_path: PathBuf,
}

impl Telemetry {
    pub fn new(db: SqlitePool, retry: RetryPolicy, db_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            retry,
            db_path: db_path.into(),
        }
    }

    /// Append one sample
    pub async fn record(&self, sample: &PerformanceSample) -> Result<i64> {
        if sample.source.trim().is_empty() {
            return Err(Error::InvalidInput("source must not be empty".to_string()));
        }
        if !sample.throughput_records_per_sec.is_finite() || sample.throughput_records_per_sec < 0.0 {
            return Err(Error::InvalidInput(format!(
                "throughput must be a non-negative number, got {}",
                sample.throughput_records_per_sec
            )));
        }

        let timestamp = time::to_storage(&time::now());
        let run_id = sample.run_id.map(|id| id.to_string());

        let id = retry_on_lock("telemetry::record", &self.retry, || async {
            let result = sqlx::query(
                r#"
                INSERT INTO performance_metrics (
                    source, timestamp, latency_ms, throughput_records_per_sec,
                    storage_size, wal_size, lock_waits, run_id
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&sample.source)
            .bind(&timestamp)
            .bind(sample.latency_ms as i64)
            .bind(sample.throughput_records_per_sec)
            .bind(sample.storage_size as i64)
            .bind(sample.wal_size as i64)
            .bind(sample.lock_waits as i64)
            .bind(&run_id)
            .execute(&self.db)
            .await?;
            Ok::<_, Error>(result.last_insert_rowid())
        })
        .await?;

        debug!(
            source = %sample.source,
            latency_ms = sample.latency_ms,
            throughput = sample.throughput_records_per_sec,
            lock_waits = sample.lock_waits,
            "Recorded performance sample"
        );
        Ok(id)
    }

    /// Current database and WAL sizes
    pub async fn storage_footprint(&self) -> Result<StorageFootprint> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count").fetch_one(&self.db).await?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size").fetch_one(&self.db).await?;

        Ok(StorageFootprint {
            database_bytes: (page_count.max(0) as u64) * (page_size.max(0) as u64),
            wal_bytes: wal_size(&self.db_path).await?,
        })
    }

    /// Samples newest first, optionally for one source and since a time
    pub async fn list(
        &self,
        source: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<Vec<PerformanceMetric>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source, timestamp, latency_ms, throughput_records_per_sec,
                   storage_size, wal_size, lock_waits, run_id
            FROM performance_metrics
            WHERE (?1 IS NULL OR source = ?1)
              AND (?2 IS NULL OR timestamp >= ?2)
            ORDER BY timestamp DESC, id DESC
            LIMIT ?3
            "#,
        )
        .bind(source)
        .bind(since.as_ref().map(time::to_storage))
        .bind(limit.map(i64::from).unwrap_or(-1))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_metric).collect()
    }

    /// Per-source aggregates of samples since `since`
    pub async fn summary(&self, since: Option<DateTime<Utc>>) -> Result<Vec<MetricSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT source,
                   COUNT(*) AS samples,
                   AVG(latency_ms) AS avg_latency_ms,
                   MAX(latency_ms) AS max_latency_ms,
                   AVG(throughput_records_per_sec) AS avg_throughput,
                   MAX(storage_size) AS max_storage_size,
                   MAX(wal_size) AS max_wal_size,
                   SUM(lock_waits) AS total_lock_waits
            FROM performance_metrics
            WHERE (?1 IS NULL OR timestamp >= ?1)
            GROUP BY source
            ORDER BY source
            "#,
        )
        .bind(since.as_ref().map(time::to_storage))
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| -> Result<MetricSummary> {
                Ok(MetricSummary {
                    source: row.try_get("source")?,
                    samples: row.try_get::<i64, _>("samples")?.max(0) as u64,
                    avg_latency_ms: row.try_get("avg_latency_ms")?,
                    max_latency_ms: row.try_get::<i64, _>("max_latency_ms")?.max(0) as u64,
                    avg_throughput: row.try_get("avg_throughput")?,
                    max_storage_size: row.try_get::<i64, _>("max_storage_size")?.max(0) as u64,
                    max_wal_size: row.try_get::<i64, _>("max_wal_size")?.max(0) as u64,
                    total_lock_waits: row.try_get::<i64, _>("total_lock_waits")?.max(0) as u64,
                })
            })
            .collect()
    }

    /// Checkpoint the WAL into the main file and truncate it
    pub async fn checkpoint(&self) -> Result<CheckpointResult> {
        let row = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .fetch_one(&self.db)
            .await?;

        let result = CheckpointResult {
            busy: row.try_get::<i64, _>(0)? != 0,
            log_frames: row.try_get(1)?,
            checkpointed_frames: row.try_get(2)?,
        };

        if result.busy {
            warn!(
                log_frames = result.log_frames,
                checkpointed_frames = result.checkpointed_frames,
                "WAL checkpoint incomplete, database busy"
            );
        } else {
            info!(checkpointed_frames = result.checkpointed_frames, "WAL checkpoint completed");
        }
        Ok(result)
    }

    /// Checkpoint only when the WAL has grown past `threshold_bytes`
    pub async fn checkpoint_if_needed(&self, threshold_bytes: u64) -> Result<Option<CheckpointResult>> {
        let wal_bytes = wal_size(&self.db_path).await?;
        if wal_bytes <= threshold_bytes {
            debug!(wal_bytes, threshold_bytes, "WAL below checkpoint threshold");
            return Ok(None);
        }

        info!(wal_bytes, threshold_bytes, "WAL above threshold, checkpointing");
        self.checkpoint().await.map(Some)
    }
}

/// Size of `<db>-wal`, zero when absent
async fn wal_size(db_path: &Path) -> Result<u64> {
    let mut wal = db_path.as_os_str().to_owned();
    wal.push("-wal");

    match tokio::fs::metadata(PathBuf::from(wal)).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(Error::Io(e)),
    }
}

fn row_to_metric(row: &SqliteRow) -> Result<PerformanceMetric> {
    let timestamp: String = row.try_get("timestamp")?;
    let run_id: Option<String> = row.try_get("run_id")?;
    let unsigned = |column: &str| -> Result<u64> { Ok(row.try_get::<i64, _>(column)?.max(0) as u64) };

    Ok(PerformanceMetric {
        id: row.try_get("id")?,
        timestamp: time::from_storage(&timestamp)?,
        sample: PerformanceSample {
            source: row.try_get("source")?,
            latency_ms: unsigned("latency_ms")?,
            throughput_records_per_sec: row.try_get("throughput_records_per_sec")?,
            storage_size: unsigned("storage_size")?,
            wal_size: unsigned("wal_size")?,
            lock_waits: unsigned("lock_waits")?,
            run_id: run_id.as_deref().map(uuid_utils::parse).transpose()?,
        },
    })
}
