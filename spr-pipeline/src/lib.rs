//! spr-pipeline library - multi-source observation reconciliation
//!
//! Raw observations from many sources are staged append-only, deduplicated by
//! content hash, and reconciled into one canonical record per
//! `(entity_key, timestamp, granularity)` by a versioned source priority
//! registry. Ingestion runs and performance samples are tracked alongside.

use sqlx::SqlitePool;
use spr_common::db::{init_database, LockStats, RetryPolicy};
use spr_common::{PipelineConfig, Result};
use std::path::{Path, PathBuf};
use tracing::info;

pub mod hashing;
pub mod ingest;
pub mod locks;
pub mod models;
pub mod priority;
pub mod report;
pub mod resolver;
pub mod runs;
pub mod staging;
pub mod telemetry;

use ingest::BatchIngester;
use models::Granularity;
use priority::PriorityRegistry;
use report::{IssueThresholds, Reporter};
use resolver::Resolver;
use runs::RunTracker;
use staging::StagingStore;
use telemetry::Telemetry;

/// All pipeline components over one database pool
#[derive(Clone)]
pub struct Pipeline {
    pub db: SqlitePool,
    pub db_path: PathBuf,
    pub config: PipelineConfig,
    /// Lock retries across every component, for telemetry
    pub lock_stats: LockStats,
    pub staging: StagingStore,
    pub registry: PriorityRegistry,
    pub resolver: Resolver,
    pub runs: RunTracker,
    pub telemetry: Telemetry,
    pub ingester: BatchIngester,
    pub reporter: Reporter,
}

impl Pipeline {
    /// Open (or create) the database at `db_path` and wire the components
    pub async fn open(db_path: &Path, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let db = init_database(db_path, &config).await?;
        Self::from_pool(db, db_path.to_path_buf(), config)
    }

    /// Wire the components over an initialized pool
    pub fn from_pool(db: SqlitePool, db_path: PathBuf, config: PipelineConfig) -> Result<Self> {
        let lock_stats = LockStats::new();
        let retry = RetryPolicy::new(config.max_lock_wait_ms).with_stats(lock_stats.clone());

        let staging = StagingStore::new(db.clone(), retry.clone());
        let registry = PriorityRegistry::new(db.clone(), retry.clone());
        let resolver = Resolver::new(db.clone(), retry.clone(), staging.clone(), registry.clone());
        let runs = RunTracker::new(db.clone(), retry.clone());
        let telemetry = Telemetry::new(db.clone(), retry, db_path.clone());
        let ingester = BatchIngester::new(
            staging.clone(),
            resolver.clone(),
            runs.clone(),
            telemetry.clone(),
            lock_stats.clone(),
        )
        .with_resolution(config.resolve_after_ingest, config.default_granularity)
        .with_progress_interval(config.batch_size);
        let reporter = Reporter::new(
            db.clone(),
            runs.clone(),
            telemetry.clone(),
            IssueThresholds::from_config(&config),
        );

        Ok(Self {
            db,
            db_path,
            config,
            lock_stats,
            staging,
            registry,
            resolver,
            runs,
            telemetry,
            ingester,
            reporter,
        })
    }

    /// Granularity used when a caller does not name one
    pub fn default_granularity(&self) -> Granularity {
        self.config.default_granularity
    }

    /// Apply the configured priority file, if one is set and it changed
    ///
    /// An unchanged file is skipped, so facts recorded with `set_priority`
    /// since the file was last applied are not reverted. Returns the number of
    /// facts appended; `None` when no file is configured.
    pub async fn reload_priorities(&self) -> Result<Option<usize>> {
        let Some(path) = &self.config.priorities_path else {
            return Ok(None);
        };
        match self.registry.load_file_if_changed(path).await? {
            Some(appended) => {
                info!(appended, "Source priorities reloaded from {}", path.display());
                Ok(Some(appended))
            }
            None => Ok(Some(0)),
        }
    }
}
