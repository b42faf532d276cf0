//! Database schema migrations
//!
//! Versioned, idempotent schema changes tracked in `schema_version`. Table
//! creation lives in [`crate::db::init`]; everything layered on top of the
//! base tables (indexes, guard triggers) is added here so databases created by
//! older builds are upgraded in place.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - databases in the field have already applied them
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Stay idempotent** - use `IF NOT EXISTS` or check `pragma_table_info` first

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

/// Set schema version in database
async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    if current_version < 3 {
        migrate_v3(pool).await?;
        set_schema_version(pool, 3).await?;
        info!("Migration v3 completed");
    }

    info!("All migrations completed successfully");
    Ok(())
}

/// Migration v1: indexes for the resolver, run listing and telemetry queries
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: lookup indexes");

    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_raw_entity_timestamp ON raw_observations (entity_key, timestamp)",
        "CREATE INDEX IF NOT EXISTS idx_priority_lookup ON source_priority (data_type, source, effective_from)",
        "CREATE INDEX IF NOT EXISTS idx_runs_source_status ON ingestion_runs (source, status, start_time)",
        "CREATE INDEX IF NOT EXISTS idx_metrics_source_timestamp ON performance_metrics (source, timestamp)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Migration v2: reject updates to append-only tables at the storage layer
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: append-only guards");

    let statements = [
        r#"
        CREATE TRIGGER IF NOT EXISTS raw_observations_immutable
        BEFORE UPDATE ON raw_observations
        BEGIN
            SELECT RAISE(ABORT, 'raw_observations rows are immutable');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS performance_metrics_append_only
        BEFORE UPDATE ON performance_metrics
        BEGIN
            SELECT RAISE(ABORT, 'performance_metrics rows are append-only');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS ingestion_runs_keep_audit
        BEFORE DELETE ON ingestion_runs
        BEGIN
            SELECT RAISE(ABORT, 'ingestion_runs rows are never deleted');
        END
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Migration v3: last applied content of each priority file
async fn migrate_v3(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v3: applied priority files");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS applied_priority_files (
            path TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
