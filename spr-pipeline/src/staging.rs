//! Raw staging store with content-hash deduplication
//!
//! Append-only. Staging never triggers resolution; it only records what a
//! source said so the resolver can decide later. Re-staging an identical
//! observation is a no-op that reports `duplicate`.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use spr_common::db::{retry_on_lock, LockStats, RetryPolicy};
use spr_common::{time, Error, Result};
use uuid::Uuid;

use crate::hashing::{canonical_json, content_hash};
use crate::models::{ObservationInput, RawObservation, StageOutcome};

/// Raw observation store
#[derive(Clone)]
pub struct StagingStore {
    db: SqlitePool,
    retry: RetryPolicy,
}

impl StagingStore {
    pub fn new(db: SqlitePool, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }

    /// Same store, counting lock waits into `stats`
    pub fn with_lock_stats(&self, stats: LockStats) -> Self {
        Self {
            db: self.db.clone(),
            retry: self.retry.clone().with_stats(stats),
        }
    }

    /// Stage one observation outside of any ingestion run
    pub async fn stage(&self, source: &str, input: &ObservationInput) -> Result<StageOutcome> {
        self.stage_for_run(source, input, None).await
    }

    /// Stage one observation, tagging it with the run that produced it
    ///
    /// **Algorithm:**
    /// 1. Validate identifiers and canonicalize the payload (malformed -> error, nothing written)
    /// 2. Compute the content hash
    /// 3. Insert; the unique constraint turns a duplicate into a zero-row insert
    pub async fn stage_for_run(
        &self,
        source: &str,
        input: &ObservationInput,
        run_id: Option<Uuid>,
    ) -> Result<StageOutcome> {
        if source.trim().is_empty() {
            return Err(Error::InvalidInput("source must not be empty".to_string()));
        }
        if input.entity_key.trim().is_empty() {
            return Err(Error::InvalidInput("entity_key must not be empty".to_string()));
        }

        // Payload is stored in the same canonical form that was hashed
        let payload = canonical_json(&input.payload)?;
        let hash = content_hash(source, input.data_type, &input.entity_key, &input.timestamp, &input.payload)?;
        let timestamp = time::to_storage(&input.timestamp);
        let run_id = run_id.map(|id| id.to_string());

        let inserted_id = retry_on_lock("staging::insert", &self.retry, || async {
            let ingested_at = time::to_storage(&time::now());
            let result = sqlx::query(
                r#"
                INSERT INTO raw_observations (
                    source, data_type, entity_key, timestamp,
                    payload, content_hash, ingested_at, run_id
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (source, entity_key, timestamp, content_hash) DO NOTHING
                "#,
            )
            .bind(source)
            .bind(input.data_type.as_str())
            .bind(&input.entity_key)
            .bind(&timestamp)
            .bind(&payload)
            .bind(&hash)
            .bind(&ingested_at)
            .bind(&run_id)
            .execute(&self.db)
            .await?;

            Ok::<_, Error>((result.rows_affected() > 0).then(|| result.last_insert_rowid()))
        })
        .await?;

        match inserted_id {
            Some(observation_id) => {
                tracing::debug!(
                    source = source,
                    entity_key = %input.entity_key,
                    observation_id,
                    "Staged raw observation"
                );
                Ok(StageOutcome::Accepted { observation_id, content_hash: hash })
            }
            None => {
                tracing::debug!(
                    source = source,
                    entity_key = %input.entity_key,
                    hash = %hash,
                    "Duplicate observation ignored"
                );
                Ok(StageOutcome::Duplicate { content_hash: hash })
            }
        }
    }

    /// All observations for an entity with `from <= timestamp < to`, any source
    pub async fn observations_between(
        &self,
        entity_key: &str,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
    ) -> Result<Vec<RawObservation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source, data_type, entity_key, timestamp, payload,
                   content_hash, ingested_at, run_id
            FROM raw_observations
            WHERE entity_key = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY id
            "#,
        )
        .bind(entity_key)
        .bind(time::to_storage(from))
        .bind(time::to_storage(to))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_observation).collect()
    }

    /// Fetch a single observation by id
    pub async fn get(&self, id: i64) -> Result<Option<RawObservation>> {
        let row = sqlx::query(
            r#"
            SELECT id, source, data_type, entity_key, timestamp, payload,
                   content_hash, ingested_at, run_id
            FROM raw_observations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(row_to_observation).transpose()
    }

    /// Number of staged observations, optionally for one source
    pub async fn count(&self, source: Option<&str>) -> Result<i64> {
        let count = match source {
            Some(source) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM raw_observations WHERE source = ?")
                    .bind(source)
                    .fetch_one(&self.db)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM raw_observations")
                    .fetch_one(&self.db)
                    .await?
            }
        };
        Ok(count)
    }
}

fn row_to_observation(row: &SqliteRow) -> Result<RawObservation> {
    let data_type: String = row.try_get("data_type")?;
    let timestamp: String = row.try_get("timestamp")?;
    let ingested_at: String = row.try_get("ingested_at")?;
    let payload: String = row.try_get("payload")?;
    let run_id: Option<String> = row.try_get("run_id")?;

    Ok(RawObservation {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        data_type: data_type.parse()?,
        entity_key: row.try_get("entity_key")?,
        timestamp: time::from_storage(&timestamp)?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| Error::Internal(format!("Stored payload is not JSON: {}", e)))?,
        content_hash: row.try_get("content_hash")?,
        ingested_at: time::from_storage(&ingested_at)?,
        run_id: run_id.as_deref().map(spr_common::uuid_utils::parse).transpose()?,
    })
}
