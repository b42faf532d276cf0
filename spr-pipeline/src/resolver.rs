//! Canonical resolver
//!
//! Picks one winning raw observation per `(entity_key, bucket, granularity)`
//! among sources active in the priority registry and writes it as the
//! canonical record.
//!
//! **Winner:** lowest priority number; among equal priorities the latest
//! observation time in the bucket, then the latest `ingested_at` (a re-send
//! for the same instant), then the highest row id.
//!
//! **Overwrite rule:** an existing record is replaced only when the winner's
//! priority is less than or equal to the current priority of the source that
//! produced the record, or when that source is no longer active. Anything else
//! is a policy violation: logged and left unchanged.
//!
//! Resolution of one key is serialized in-process by a keyed lock. Writes are
//! compare-and-swap on the record's `raw_observation_id`, so a writer from
//! another process that got in first makes this one re-read and decide again.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use spr_common::db::{begin_monitored, retry_on_lock, LockStats, RetryPolicy};
use spr_common::{time, Error, Result};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

use crate::locks::KeyedLocks;
use crate::models::{CanonicalRecord, CanonicalValues, DataType, Granularity, RawObservation};
use crate::priority::{PriorityRegistry, PrioritySnapshot};
use crate::staging::StagingStore;

/// Attempts at a compare-and-swap write before giving up
const MAX_WRITE_ATTEMPTS: usize = 3;

/// What a resolution did to the stored canonical record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveAction {
    Created,
    Updated,
    /// Record already reflects the winner
    Unchanged,
    /// Record removed: its source went inactive and no active source has data
    Cleared,
    /// No record and no active data; not an error
    Absent,
    /// Winner would lower the record's priority; record left as is
    Rejected,
}

impl ResolveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveAction::Created => "created",
            ResolveAction::Updated => "updated",
            ResolveAction::Unchanged => "unchanged",
            ResolveAction::Cleared => "cleared",
            ResolveAction::Absent => "absent",
            ResolveAction::Rejected => "rejected",
        }
    }

    /// True when the stored record changed
    pub fn changed(&self) -> bool {
        matches!(self, ResolveAction::Created | ResolveAction::Updated | ResolveAction::Cleared)
    }
}

/// Result of [`Resolver::resolve`]
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOutcome {
    pub action: ResolveAction,
    /// The record as stored after resolution
    pub record: Option<CanonicalRecord>,
}

/// A raw observation that passed the priority filter
#[derive(Debug, Clone)]
struct Candidate {
    observation: RawObservation,
    rank: i64,
    values: CanonicalValues,
}

/// Best first: lowest rank, latest observation, latest ingest, highest id
fn candidate_order(a: &Candidate, b: &Candidate) -> Ordering {
    a.rank
        .cmp(&b.rank)
        .then_with(|| b.observation.timestamp.cmp(&a.observation.timestamp))
        .then_with(|| b.observation.ingested_at.cmp(&a.observation.ingested_at))
        .then_with(|| b.observation.id.cmp(&a.observation.id))
}

enum Decision {
    Write(CanonicalRecord, ResolveAction),
    Clear,
    Keep(ResolveAction),
    Reject { winner: Candidate, current_rank: i64 },
}

#[derive(Clone)]
pub struct Resolver {
    db: SqlitePool,
    retry: RetryPolicy,
    staging: StagingStore,
    registry: PriorityRegistry,
    locks: KeyedLocks,
}

impl Resolver {
    pub fn new(db: SqlitePool, retry: RetryPolicy, staging: StagingStore, registry: PriorityRegistry) -> Self {
        Self {
            db,
            retry,
            staging,
            registry,
            locks: KeyedLocks::new(),
        }
    }

    /// Same resolver and key locks, counting lock waits into `stats`
    pub fn with_lock_stats(&self, stats: LockStats) -> Self {
        Self {
            db: self.db.clone(),
            retry: self.retry.clone().with_stats(stats.clone()),
            staging: self.staging.with_lock_stats(stats.clone()),
            registry: self.registry.with_lock_stats(stats),
            locks: self.locks.clone(),
        }
    }

    /// Resolve the canonical record for the bucket containing `timestamp`
    pub async fn resolve(
        &self,
        entity_key: &str,
        timestamp: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<ResolveOutcome> {
        if entity_key.trim().is_empty() {
            return Err(Error::InvalidInput("entity_key must not be empty".to_string()));
        }
        let bucket = granularity.bucket_start(timestamp);
        let lock_key = format!("{}|{}|{}", entity_key, time::to_storage(&bucket), granularity);
        let _guard = self.locks.acquire(&lock_key).await;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let existing = self.read_record(entity_key, &bucket, granularity).await?;
            let observations = self
                .staging
                .observations_between(entity_key, &bucket, &granularity.bucket_end(timestamp))
                .await?;

            let now = time::now();
            let mut data_types: BTreeSet<DataType> = observations.iter().map(|o| o.data_type).collect();
            if let Some(record) = &existing {
                data_types.insert(record.data_type);
            }
            let snapshots = self.snapshots(data_types, &now).await?;
            let winner = select_winner(entity_key, observations, &snapshots)?;

            let expected = existing.as_ref().map(|r| r.raw_observation_id);
            match decide(existing, winner, &snapshots, entity_key, bucket, granularity, now) {
                Decision::Keep(action) => {
                    let record = self.read_record(entity_key, &bucket, granularity).await?;
                    return Ok(ResolveOutcome { action, record });
                }
                Decision::Reject { winner, current_rank } => {
                    warn!(
                        entity_key = entity_key,
                        timestamp = %bucket,
                        granularity = %granularity,
                        candidate_source = %winner.observation.source,
                        candidate_priority = winner.rank,
                        current_priority = current_rank,
                        "Resolution rejected: policy violation, would lower canonical priority"
                    );
                    let record = self.read_record(entity_key, &bucket, granularity).await?;
                    return Ok(ResolveOutcome { action: ResolveAction::Rejected, record });
                }
                Decision::Clear => {
                    if self.swap(entity_key, &bucket, granularity, expected, None).await? {
                        info!(
                            entity_key = entity_key,
                            timestamp = %bucket,
                            granularity = %granularity,
                            "Canonical record cleared, no active source has data"
                        );
                        return Ok(ResolveOutcome { action: ResolveAction::Cleared, record: None });
                    }
                }
                Decision::Write(record, action) => {
                    if self.swap(entity_key, &bucket, granularity, expected, Some(&record)).await? {
                        debug!(
                            entity_key = entity_key,
                            timestamp = %bucket,
                            winning_source = %record.winning_source,
                            action = action.as_str(),
                            "Canonical record written"
                        );
                        return Ok(ResolveOutcome { action, record: Some(record) });
                    }
                }
            }

            debug!(
                entity_key = entity_key,
                attempt,
                "Canonical record changed during resolution, re-reading"
            );
        }

        Err(Error::Contention(format!(
            "canonical record ({}, {}, {}) kept changing during resolution",
            entity_key,
            time::to_storage(&bucket),
            granularity
        )))
    }

    /// Resolution as it would have come out at `at`, without writing
    ///
    /// Uses only observations ingested by `at` and the priority facts in force
    /// at `at`. The overwrite rule does not apply: this is the winner on that
    /// state alone.
    pub async fn resolve_as_of(
        &self,
        entity_key: &str,
        timestamp: DateTime<Utc>,
        granularity: Granularity,
        at: DateTime<Utc>,
    ) -> Result<Option<CanonicalRecord>> {
        let bucket = granularity.bucket_start(timestamp);
        let observations: Vec<RawObservation> = self
            .staging
            .observations_between(entity_key, &bucket, &granularity.bucket_end(timestamp))
            .await?
            .into_iter()
            .filter(|o| o.ingested_at <= at)
            .collect();

        let data_types: BTreeSet<DataType> = observations.iter().map(|o| o.data_type).collect();
        let snapshots = self.snapshots(data_types, &at).await?;

        Ok(select_winner(entity_key, observations, &snapshots)?
            .map(|winner| build_record(entity_key, bucket, granularity, winner, at)))
    }

    /// Canonical records for an entity with bucket start in `[from, to]`
    pub async fn get_canonical(
        &self,
        entity_key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<CanonicalRecord>> {
        if from > to {
            return Err(Error::InvalidInput(format!("empty range: {} is after {}", from, to)));
        }

        let rows = sqlx::query(
            r#"
            SELECT entity_key, timestamp, granularity, data_type, value_fields,
                   winning_source, winning_priority, raw_observation_id, resolved_at
            FROM canonical_records
            WHERE entity_key = ? AND granularity = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp
            "#,
        )
        .bind(entity_key)
        .bind(granularity.as_str())
        .bind(time::to_storage(&granularity.bucket_start(from)))
        .bind(time::to_storage(&to))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Newest canonical record for an entity
    pub async fn latest_canonical(
        &self,
        entity_key: &str,
        granularity: Granularity,
    ) -> Result<Option<CanonicalRecord>> {
        let row = sqlx::query(
            r#"
            SELECT entity_key, timestamp, granularity, data_type, value_fields,
                   winning_source, winning_priority, raw_observation_id, resolved_at
            FROM canonical_records
            WHERE entity_key = ? AND granularity = ?
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(entity_key)
        .bind(granularity.as_str())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn read_record(
        &self,
        entity_key: &str,
        bucket: &DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Option<CanonicalRecord>> {
        let row = sqlx::query(
            r#"
            SELECT entity_key, timestamp, granularity, data_type, value_fields,
                   winning_source, winning_priority, raw_observation_id, resolved_at
            FROM canonical_records
            WHERE entity_key = ? AND timestamp = ? AND granularity = ?
            "#,
        )
        .bind(entity_key)
        .bind(time::to_storage(bucket))
        .bind(granularity.as_str())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn snapshots(
        &self,
        data_types: BTreeSet<DataType>,
        at: &DateTime<Utc>,
    ) -> Result<HashMap<DataType, PrioritySnapshot>> {
        let mut snapshots = HashMap::new();
        for data_type in data_types {
            snapshots.insert(data_type, self.registry.snapshot(data_type, at).await?);
        }
        Ok(snapshots)
    }

    /// Replace the stored record if it still points at `expected`
    ///
    /// Returns false when another writer changed the record first.
    async fn swap(
        &self,
        entity_key: &str,
        bucket: &DateTime<Utc>,
        granularity: Granularity,
        expected: Option<i64>,
        record: Option<&CanonicalRecord>,
    ) -> Result<bool> {
        let timestamp = time::to_storage(bucket);
        let values = record
            .map(|r| serde_json::to_string(&r.values))
            .transpose()
            .map_err(|e| Error::Internal(format!("Serialize canonical values failed: {}", e)))?;

        retry_on_lock("resolver::write", &self.retry, || async {
            let mut tx = begin_monitored(&self.db, "resolver::write").await?;

            let current: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT raw_observation_id FROM canonical_records
                WHERE entity_key = ? AND timestamp = ? AND granularity = ?
                "#,
            )
            .bind(entity_key)
            .bind(&timestamp)
            .bind(granularity.as_str())
            .fetch_optional(&mut **tx.inner_mut())
            .await?;

            if current != expected {
                tx.rollback().await?;
                return Ok(false);
            }

            match (record, &values) {
                (Some(record), Some(values)) => {
                    sqlx::query(
                        r#"
                        INSERT INTO canonical_records (
                            entity_key, timestamp, granularity, data_type, value_fields,
                            winning_source, winning_priority, raw_observation_id, resolved_at
                        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT (entity_key, timestamp, granularity) DO UPDATE SET
                            data_type = excluded.data_type,
                            value_fields = excluded.value_fields,
                            winning_source = excluded.winning_source,
                            winning_priority = excluded.winning_priority,
                            raw_observation_id = excluded.raw_observation_id,
                            resolved_at = excluded.resolved_at
                        "#,
                    )
                    .bind(entity_key)
                    .bind(&timestamp)
                    .bind(granularity.as_str())
                    .bind(record.data_type.as_str())
                    .bind(values)
                    .bind(&record.winning_source)
                    .bind(record.winning_priority)
                    .bind(record.raw_observation_id)
                    .bind(time::to_storage(&record.resolved_at))
                    .execute(&mut **tx.inner_mut())
                    .await?;
                }
                _ => {
                    sqlx::query(
                        r#"
                        DELETE FROM canonical_records
                        WHERE entity_key = ? AND timestamp = ? AND granularity = ?
                        "#,
                    )
                    .bind(entity_key)
                    .bind(&timestamp)
                    .bind(granularity.as_str())
                    .execute(&mut **tx.inner_mut())
                    .await?;
                }
            }

            tx.commit().await?;
            Ok::<_, Error>(true)
        })
        .await
    }
}

/// Best active candidate, if any
fn select_winner(
    entity_key: &str,
    observations: Vec<RawObservation>,
    snapshots: &HashMap<DataType, PrioritySnapshot>,
) -> Result<Option<Candidate>> {
    let active: Vec<(RawObservation, i64)> = observations
        .into_iter()
        .filter_map(|o| {
            let rank = snapshots.get(&o.data_type)?.active_rank(&o.source)?;
            Some((o, rank))
        })
        .collect();

    let data_types: BTreeSet<DataType> = active.iter().map(|(o, _)| o.data_type).collect();
    if data_types.len() > 1 {
        let names: Vec<&str> = data_types.iter().map(|d| d.as_str()).collect();
        return Err(Error::InvalidInput(format!(
            "entity {} has active observations of several data types: {}",
            entity_key,
            names.join(", ")
        )));
    }

    let candidates = active.into_iter().filter_map(|(observation, rank)| {
        match CanonicalValues::extract(observation.data_type, &observation.payload) {
            Some(values) => Some(Candidate { observation, rank, values }),
            None => {
                debug!(
                    entity_key = entity_key,
                    observation_id = observation.id,
                    source = %observation.source,
                    "Observation carries no value fields, skipped"
                );
                None
            }
        }
    });

    Ok(candidates.min_by(candidate_order))
}

fn decide(
    existing: Option<CanonicalRecord>,
    winner: Option<Candidate>,
    snapshots: &HashMap<DataType, PrioritySnapshot>,
    entity_key: &str,
    bucket: DateTime<Utc>,
    granularity: Granularity,
    now: DateTime<Utc>,
) -> Decision {
    let current_rank = |record: &CanonicalRecord| {
        snapshots
            .get(&record.data_type)
            .and_then(|s| s.active_rank(&record.winning_source))
    };

    match (existing, winner) {
        (None, None) => Decision::Keep(ResolveAction::Absent),
        (Some(record), None) => {
            if current_rank(&record).is_some() {
                Decision::Keep(ResolveAction::Unchanged)
            } else {
                Decision::Clear
            }
        }
        (None, Some(winner)) => Decision::Write(
            build_record(entity_key, bucket, granularity, winner, now),
            ResolveAction::Created,
        ),
        (Some(record), Some(winner)) => {
            // Values are a function of the immutable raw row
            if record.raw_observation_id == winner.observation.id
                && record.winning_priority == winner.rank
                && record.data_type == winner.observation.data_type
            {
                return Decision::Keep(ResolveAction::Unchanged);
            }

            match current_rank(&record) {
                Some(rank) if winner.rank > rank => Decision::Reject { winner, current_rank: rank },
                _ => Decision::Write(
                    build_record(entity_key, bucket, granularity, winner, now),
                    ResolveAction::Updated,
                ),
            }
        }
    }
}

fn build_record(
    entity_key: &str,
    bucket: DateTime<Utc>,
    granularity: Granularity,
    winner: Candidate,
    resolved_at: DateTime<Utc>,
) -> CanonicalRecord {
    CanonicalRecord {
        entity_key: entity_key.to_string(),
        timestamp: bucket,
        granularity,
        data_type: winner.observation.data_type,
        values: winner.values,
        winning_source: winner.observation.source,
        winning_priority: winner.rank,
        raw_observation_id: winner.observation.id,
        resolved_at,
    }
}

fn row_to_record(row: &SqliteRow) -> Result<CanonicalRecord> {
    let timestamp: String = row.try_get("timestamp")?;
    let granularity: String = row.try_get("granularity")?;
    let data_type: String = row.try_get("data_type")?;
    let values: String = row.try_get("value_fields")?;
    let resolved_at: String = row.try_get("resolved_at")?;

    Ok(CanonicalRecord {
        entity_key: row.try_get("entity_key")?,
        timestamp: time::from_storage(&timestamp)?,
        granularity: granularity.parse()?,
        data_type: data_type.parse()?,
        values: serde_json::from_str(&values)
            .map_err(|e| Error::Internal(format!("Stored canonical values unreadable: {}", e)))?,
        winning_source: row.try_get("winning_source")?,
        winning_priority: row.try_get("winning_priority")?,
        raw_observation_id: row.try_get("raw_observation_id")?,
        resolved_at: time::from_storage(&resolved_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourcePriority;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn observation(id: i64, source: &str, price: f64, ingested_offset_secs: i64) -> RawObservation {
        let day = Utc.with_ymd_and_hms(2025, 1, 7, 0, 0, 0).unwrap();
        RawObservation {
            id,
            source: source.to_string(),
            data_type: DataType::Price,
            entity_key: "SOJA:MT".to_string(),
            timestamp: day,
            payload: json!({ "price": price }),
            content_hash: format!("hash-{}", id),
            ingested_at: day + Duration::seconds(ingested_offset_secs),
            run_id: None,
        }
    }

    fn candidate(id: i64, rank: i64, ingested_offset_secs: i64) -> Candidate {
        let observation = observation(id, "X", 1.0, ingested_offset_secs);
        let values = CanonicalValues::extract(DataType::Price, &observation.payload).unwrap();
        Candidate { observation, rank, values }
    }

    #[test]
    fn test_lower_rank_wins_before_recency() {
        let mut list = vec![candidate(1, 2, 100), candidate(2, 1, 0)];
        list.sort_by(candidate_order);
        assert_eq!(list[0].observation.id, 2);
    }

    #[test]
    fn test_equal_rank_latest_ingest_wins() {
        let mut list = vec![candidate(1, 1, 100), candidate(2, 1, 0)];
        list.sort_by(candidate_order);
        assert_eq!(list[0].observation.id, 1);
    }

    #[test]
    fn test_equal_rank_later_observation_beats_later_ingest() {
        let evening = candidate(1, 1, 0);
        let mut morning = candidate(2, 1, 3600);
        morning.observation.timestamp = evening.observation.timestamp - Duration::hours(9);
        let mut list = vec![morning, evening];
        list.sort_by(candidate_order);
        assert_eq!(list[0].observation.id, 1);
    }

    #[test]
    fn test_equal_rank_and_ingest_highest_id_wins() {
        let mut list = vec![candidate(3, 1, 0), candidate(7, 1, 0)];
        list.sort_by(candidate_order);
        assert_eq!(list[0].observation.id, 7);
    }

    fn snapshot(facts: &[(&str, i64, bool)]) -> HashMap<DataType, PrioritySnapshot> {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let facts = facts.iter().enumerate().map(|(i, (source, priority, is_active))| SourcePriority {
            id: i as i64 + 1,
            data_type: DataType::Price,
            source: source.to_string(),
            priority: *priority,
            is_active: *is_active,
            effective_from: at,
            recorded_at: at,
        });
        HashMap::from([(DataType::Price, PrioritySnapshot::from_facts(facts))])
    }

    fn stored(source: &str, priority: i64, raw_id: i64) -> CanonicalRecord {
        let day = Utc.with_ymd_and_hms(2025, 1, 7, 0, 0, 0).unwrap();
        CanonicalRecord {
            entity_key: "SOJA:MT".to_string(),
            timestamp: day,
            granularity: Granularity::Daily,
            data_type: DataType::Price,
            values: CanonicalValues::extract(DataType::Price, &json!({"price": 145.5})).unwrap(),
            winning_source: source.to_string(),
            winning_priority: priority,
            raw_observation_id: raw_id,
            resolved_at: day,
        }
    }

    fn run_decide(
        existing: Option<CanonicalRecord>,
        winner: Option<Candidate>,
        snapshots: &HashMap<DataType, PrioritySnapshot>,
    ) -> Decision {
        let day = Utc.with_ymd_and_hms(2025, 1, 7, 0, 0, 0).unwrap();
        decide(existing, winner, snapshots, "SOJA:MT", day, Granularity::Daily, day)
    }

    #[test]
    fn test_lower_precedence_winner_is_rejected() {
        let snaps = snapshot(&[("CEPEA", 1, true), ("IMEA", 2, true)]);
        let decision = run_decide(Some(stored("CEPEA", 1, 10)), Some(candidate(11, 2, 0)), &snaps);
        assert!(matches!(decision, Decision::Reject { current_rank: 1, .. }));
    }

    #[test]
    fn test_inactive_record_source_allows_overwrite() {
        let snaps = snapshot(&[("CEPEA", 1, false), ("IMEA", 2, true)]);
        let decision = run_decide(Some(stored("CEPEA", 1, 10)), Some(candidate(11, 2, 0)), &snaps);
        assert!(matches!(decision, Decision::Write(_, ResolveAction::Updated)));
    }

    #[test]
    fn test_same_winner_is_unchanged() {
        let snaps = snapshot(&[("CEPEA", 1, true)]);
        let decision = run_decide(Some(stored("CEPEA", 1, 11)), Some(candidate(11, 1, 0)), &snaps);
        assert!(matches!(decision, Decision::Keep(ResolveAction::Unchanged)));
    }

    #[test]
    fn test_no_data_clears_only_inactive_records() {
        let inactive = snapshot(&[("CEPEA", 1, false)]);
        assert!(matches!(run_decide(Some(stored("CEPEA", 1, 10)), None, &inactive), Decision::Clear));

        let active = snapshot(&[("CEPEA", 1, true)]);
        assert!(matches!(
            run_decide(Some(stored("CEPEA", 1, 10)), None, &active),
            Decision::Keep(ResolveAction::Unchanged)
        ));
        assert!(matches!(run_decide(None, None, &active), Decision::Keep(ResolveAction::Absent)));
    }

    #[test]
    fn test_mixed_data_types_are_invalid() {
        let mut weather = observation(2, "INMET", 0.0, 0);
        weather.data_type = DataType::Weather;
        weather.payload = json!({"temperatura_media": 24.0});

        let mut snaps = snapshot(&[("CEPEA", 1, true)]);
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        snaps.insert(
            DataType::Weather,
            PrioritySnapshot::from_facts([SourcePriority {
                id: 9,
                data_type: DataType::Weather,
                source: "INMET".to_string(),
                priority: 1,
                is_active: true,
                effective_from: at,
                recorded_at: at,
            }]),
        );

        let result = select_winner("SOJA:MT", vec![observation(1, "CEPEA", 145.5, 0), weather], &snaps);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_payload_without_values_falls_through() {
        let mut empty = observation(1, "CEPEA", 0.0, 0);
        empty.payload = json!({"note": "feriado"});
        let snaps = snapshot(&[("CEPEA", 1, true), ("IMEA", 2, true)]);

        let winner = select_winner("SOJA:MT", vec![empty, observation(2, "IMEA", 146.0, 0)], &snaps)
            .unwrap()
            .unwrap();
        assert_eq!(winner.observation.source, "IMEA");
        assert_eq!(winner.rank, 2);
    }

    #[test]
    fn test_action_changed() {
        assert!(ResolveAction::Created.changed());
        assert!(ResolveAction::Cleared.changed());
        assert!(!ResolveAction::Unchanged.changed());
        assert!(!ResolveAction::Rejected.changed());
        assert!(!ResolveAction::Absent.changed());
    }
}
