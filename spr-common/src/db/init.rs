//! Database initialization
//!
//! Opens (creating if needed) the SQLite database that backs the pipeline and
//! installs the five pipeline tables. Every statement is idempotent, so
//! initialization is safe on each process start.

use crate::config::PipelineConfig;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path, config: &PipelineConfig) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas on the connect options apply to every pooled connection
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(crate::time::millis_to_duration(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.pool_max_connections)
        .acquire_timeout(Duration::from_millis(config.max_lock_wait_ms.max(1000)))
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema_version_table(&pool).await?;
    create_raw_observations_table(&pool).await?;
    create_source_priority_table(&pool).await?;
    create_canonical_records_table(&pool).await?;
    create_ingestion_runs_table(&pool).await?;
    create_performance_metrics_table(&pool).await?;

    // Indexes and triggers are versioned so existing databases pick them up
    crate::db::migrations::run_migrations(&pool).await?;

    info!("Database busy timeout set to {} ms", config.busy_timeout_ms);

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Raw observations exactly as received
///
/// The unique key is the deduplication guard for concurrent stagers.
async fn create_raw_observations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            data_type TEXT NOT NULL,
            entity_key TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            payload TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            ingested_at TEXT NOT NULL,
            run_id TEXT,
            UNIQUE (source, entity_key, timestamp, content_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Source priority facts; each configuration change is a new row
async fn create_source_priority_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_priority (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            data_type TEXT NOT NULL,
            source TEXT NOT NULL,
            priority INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            effective_from TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            UNIQUE (data_type, source, effective_from)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_canonical_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS canonical_records (
            entity_key TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            granularity TEXT NOT NULL CHECK (granularity IN ('hourly', 'daily', 'weekly', 'monthly')),
            data_type TEXT NOT NULL,
            value_fields TEXT NOT NULL,
            winning_source TEXT NOT NULL,
            winning_priority INTEGER NOT NULL,
            raw_observation_id INTEGER NOT NULL REFERENCES raw_observations(id),
            resolved_at TEXT NOT NULL,
            PRIMARY KEY (entity_key, timestamp, granularity)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ingestion_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_runs (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT,
            status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
            records_processed INTEGER NOT NULL DEFAULT 0,
            records_inserted INTEGER NOT NULL DEFAULT 0,
            records_updated INTEGER NOT NULL DEFAULT 0,
            records_failed INTEGER NOT NULL DEFAULT 0,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_performance_metrics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS performance_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            latency_ms INTEGER NOT NULL,
            throughput_records_per_sec REAL NOT NULL,
            storage_size INTEGER NOT NULL,
            wal_size INTEGER NOT NULL DEFAULT 0,
            lock_waits INTEGER NOT NULL DEFAULT 0,
            run_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
