//! Batch ingestion driver
//!
//! One call stages one batch from one source inside one ingestion run:
//!
//! 1. Take the per-source lock (runs of the same source never overlap here)
//! 2. `begin` the run
//! 3. Stage records one by one; cancellation is checked between records
//! 4. Resolve every key the batch touched, if enabled
//! 5. Close the run and append one telemetry sample
//!
//! Record-level staging failures (malformed payload, bad identifiers, lock
//! contention that outlasted the retry budget) count in `records_failed` and
//! the batch continues. Per-key resolution failures are reported but leave the
//! counters alone: the record itself was staged. Anything else fails the run
//! and is returned to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use spr_common::db::LockStats;
use spr_common::{time, Error, Result};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::locks::KeyedLocks;
use crate::models::{Granularity, ObservationInput, PerformanceSample, RunCounts, RunStatus};
use crate::resolver::{ResolveAction, Resolver};
use crate::runs::RunTracker;
use crate::staging::StagingStore;
use crate::telemetry::Telemetry;

/// One record of a batch file, as an adapter writes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub data_type: String,
    pub entity_key: String,
    /// RFC 3339 or `YYYY-MM-DD`
    pub timestamp: String,
    pub payload: Value,
}

impl BatchRecord {
    fn to_input(&self) -> Result<ObservationInput> {
        Ok(ObservationInput::new(
            self.data_type.parse()?,
            self.entity_key.clone(),
            time::parse_timestamp(&self.timestamp)?,
            self.payload.clone(),
        ))
    }
}

/// Read a batch file: a JSON array of [`BatchRecord`]
pub async fn load_batch_file(path: &Path) -> Result<Vec<BatchRecord>> {
    let content = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&content)
        .map_err(|e| Error::InvalidInput(format!("{} is not a valid batch file: {}", path.display(), e)))
}

/// A record that was not staged or not resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    /// Position in the batch; `None` for failures during resolution
    pub index: Option<usize>,
    pub entity_key: String,
    pub message: String,
}

/// Position of a batch in flight, handed to the progress hook
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchProgress {
    pub run_id: Uuid,
    pub processed: u64,
    pub total: usize,
}

/// Called inline every progress interval, after the record is staged
pub type ProgressHook = Arc<dyn Fn(&BatchProgress) + Send + Sync>;

/// Outcome of one batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub source: String,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub cancelled: bool,
    /// Keys resolved after staging
    pub keys_resolved: u64,
    /// Resolutions refused by the overwrite rule
    pub policy_rejections: u64,
    pub failures: Vec<RecordFailure>,
    pub elapsed_ms: u64,
}

#[derive(Clone)]
pub struct BatchIngester {
    staging: StagingStore,
    resolver: Resolver,
    runs: RunTracker,
    telemetry: Telemetry,
    lock_stats: LockStats,
    source_locks: KeyedLocks,
    resolve_after_ingest: bool,
    default_granularity: Granularity,
    progress_every: usize,
    progress_hook: Option<ProgressHook>,
}

/// Per-run handles: components counting lock waits for this run only
struct RunScope {
    run_id: Uuid,
    started: Instant,
    lock_stats: LockStats,
    staging: StagingStore,
    resolver: Resolver,
    runs: RunTracker,
}

impl BatchIngester {
    pub fn new(
        staging: StagingStore,
        resolver: Resolver,
        runs: RunTracker,
        telemetry: Telemetry,
        lock_stats: LockStats,
    ) -> Self {
        Self {
            staging,
            resolver,
            runs,
            telemetry,
            lock_stats,
            source_locks: KeyedLocks::new(),
            resolve_after_ingest: true,
            default_granularity: Granularity::Daily,
            progress_every: 1000,
            progress_hook: None,
        }
    }

    /// Report progress every `records` staged records
    pub fn with_progress_interval(mut self, records: usize) -> Self {
        self.progress_every = records.max(1);
        self
    }

    pub fn with_progress_hook(mut self, hook: ProgressHook) -> Self {
        self.progress_hook = Some(hook);
        self
    }

    pub fn with_resolution(mut self, enabled: bool, granularity: Granularity) -> Self {
        self.resolve_after_ingest = enabled;
        self.default_granularity = granularity;
        self
    }

    /// Stage `records` from `source` as one ingestion run
    ///
    /// A cancelled batch closes its run as failed and returns the report;
    /// whatever was staged before cancellation stays staged.
    pub async fn ingest(
        &self,
        source: &str,
        records: &[BatchRecord],
        granularity: Option<Granularity>,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let granularity = granularity.unwrap_or(self.default_granularity);

        let _source_guard = self.source_locks.acquire(source).await;
        let scope = self.scope(source).await?;
        let run_id = scope.run_id;

        let mut counts = RunCounts::default();
        let mut failures = Vec::new();
        let mut touched: BTreeSet<(String, DateTime<Utc>)> = BTreeSet::new();
        let mut cancelled = false;

        info!(run_id = %run_id, source = source, records = records.len(), "Staging batch");

        for (index, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            counts.processed += 1;

            let staged = match record.to_input() {
                Ok(input) => scope
                    .staging
                    .stage_for_run(source, &input, Some(run_id))
                    .await
                    .map(|outcome| (input, outcome)),
                Err(e) => Err(e),
            };

            match staged {
                Ok((input, outcome)) => {
                    if outcome.accepted() {
                        counts.inserted += 1;
                    }
                    // Duplicates are resolved too, so a re-run repairs a batch whose resolution failed
                    touched.insert((input.entity_key, granularity.bucket_start(input.timestamp)));
                }
                Err(e) if e.is_record_level() => {
                    counts.failed += 1;
                    warn!(
                        run_id = %run_id,
                        source = source,
                        index,
                        entity_key = %record.entity_key,
                        error = %e,
                        "Record rejected"
                    );
                    failures.push(RecordFailure {
                        index: Some(index),
                        entity_key: record.entity_key.clone(),
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(self.abort(&scope, source, counts, e).await),
            }

            if counts.processed % self.progress_every as u64 == 0 {
                self.report_progress(run_id, counts.processed, records.len());
            }
        }

        let mut keys_resolved = 0;
        let mut policy_rejections = 0;
        if self.resolve_after_ingest && !cancelled {
            for (entity_key, bucket) in &touched {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                match scope.resolver.resolve(entity_key, *bucket, granularity).await {
                    Ok(outcome) => {
                        keys_resolved += 1;
                        if outcome.action.changed() {
                            counts.updated += 1;
                        }
                        if outcome.action == ResolveAction::Rejected {
                            policy_rejections += 1;
                        }
                    }
                    Err(e) if e.is_record_level() => {
                        warn!(
                            run_id = %run_id,
                            entity_key = %entity_key,
                            error = %e,
                            "Resolution failed for key"
                        );
                        failures.push(RecordFailure {
                            index: None,
                            entity_key: entity_key.clone(),
                            message: e.to_string(),
                        });
                    }
                    Err(e) => return Err(self.abort(&scope, source, counts, e).await),
                }
            }
        }

        let status = if cancelled {
            let reason = format!(
                "cancelled after {} of {} records",
                counts.processed,
                records.len()
            );
            scope.runs.fail(run_id, &reason, Some(counts)).await?;
            RunStatus::Failed
        } else {
            scope.runs.complete(run_id, counts).await?;
            RunStatus::Completed
        };

        let elapsed_ms = scope.started.elapsed().as_millis() as u64;
        self.record_sample(&scope, source, counts).await;

        debug!(
            run_id = %run_id,
            keys_resolved,
            policy_rejections,
            elapsed_ms,
            "Batch finished"
        );

        Ok(IngestReport {
            run_id,
            source: source.to_string(),
            status,
            counts,
            cancelled,
            keys_resolved,
            policy_rejections,
            failures,
            elapsed_ms,
        })
    }

    /// Begin a run with its own lock-wait counter
    async fn scope(&self, source: &str) -> Result<RunScope> {
        let lock_stats = self.lock_stats.child();
        let runs = self.runs.with_lock_stats(lock_stats.clone());
        let run_id = runs.begin(source).await?;

        Ok(RunScope {
            run_id,
            started: Instant::now(),
            staging: self.staging.with_lock_stats(lock_stats.clone()),
            resolver: self.resolver.with_lock_stats(lock_stats.clone()),
            runs,
            lock_stats,
        })
    }

    fn report_progress(&self, run_id: Uuid, processed: u64, total: usize) {
        info!(run_id = %run_id, processed, total, "Batch progress");
        if let Some(hook) = &self.progress_hook {
            hook(&BatchProgress { run_id, processed, total });
        }
    }

    /// Fail the run for a batch-level error and hand the error back
    async fn abort(&self, scope: &RunScope, source: &str, counts: RunCounts, error: Error) -> Error {
        if let Err(close_err) = scope.runs.fail(scope.run_id, &error.to_string(), Some(counts)).await {
            warn!(run_id = %scope.run_id, error = %close_err, "Could not mark run failed");
        }
        self.record_sample(scope, source, counts).await;
        error
    }

    /// Telemetry never fails a batch
    async fn record_sample(&self, scope: &RunScope, source: &str, counts: RunCounts) {
        let elapsed = scope.started.elapsed();
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 { counts.processed as f64 / secs } else { 0.0 };

        let footprint = match self.telemetry.storage_footprint().await {
            Ok(footprint) => footprint,
            Err(e) => {
                warn!(error = %e, "Storage footprint unavailable");
                Default::default()
            }
        };

        let sample = PerformanceSample {
            source: source.to_string(),
            latency_ms: elapsed.as_millis() as u64,
            throughput_records_per_sec: throughput,
            storage_size: footprint.database_bytes,
            wal_size: footprint.wal_bytes,
            lock_waits: scope.lock_stats.total(),
            run_id: Some(scope.run_id),
        };

        if let Err(e) = self.telemetry.record(&sample).await {
            warn!(run_id = %scope.run_id, error = %e, "Could not record performance sample");
        }
    }
}
