//! Source priority registry
//!
//! Priorities are versioned facts: every change appends a row with an
//! `effective_from` time instead of editing in place. Resolution asks for the
//! facts effective at a given instant, so replaying a past resolution gives the
//! same answer after the configuration moves on.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use spr_common::db::{retry_on_lock, LockStats, RetryPolicy};
use spr_common::{time, Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::hashing::text_hash;
use crate::models::{DataType, SourcePriority};

/// One entry of the priority configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityEntry {
    pub data_type: DataType,
    pub source: String,
    pub priority: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Priority file layout: a list of `[[source]]` tables
#[derive(Debug, Deserialize)]
struct PriorityFile {
    #[serde(default)]
    source: Vec<PriorityEntry>,
}

/// Parse priority entries from TOML text
pub fn parse_priority_config(content: &str) -> Result<Vec<PriorityEntry>> {
    let file: PriorityFile =
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse priority file failed: {}", e)))?;

    let mut seen = BTreeSet::new();
    for entry in &file.source {
        if entry.source.trim().is_empty() {
            return Err(Error::Config("priority entry with empty source".to_string()));
        }
        if !seen.insert((entry.data_type, entry.source.clone())) {
            return Err(Error::Config(format!(
                "duplicate priority entry for ({}, {})",
                entry.data_type, entry.source
            )));
        }
    }
    Ok(file.source)
}

async fn read_priority_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))
}

/// Priority facts for one data type as of one instant
#[derive(Debug, Clone, Default)]
pub struct PrioritySnapshot {
    facts: HashMap<String, SourcePriority>,
}

impl PrioritySnapshot {
    pub fn from_facts(facts: impl IntoIterator<Item = SourcePriority>) -> Self {
        Self {
            facts: facts.into_iter().map(|f| (f.source.clone(), f)).collect(),
        }
    }

    /// Rank of an active source; `None` for inactive or unknown sources
    pub fn active_rank(&self, source: &str) -> Option<i64> {
        self.facts
            .get(source)
            .filter(|fact| fact.is_active)
            .map(|fact| fact.priority)
    }
}

/// Registry of `(data_type, source) -> priority` facts
#[derive(Clone)]
pub struct PriorityRegistry {
    db: SqlitePool,
    retry: RetryPolicy,
}

const FACT_COLUMNS: &str =
    "id, data_type, source, priority, is_active, effective_from, recorded_at";

impl PriorityRegistry {
    pub fn new(db: SqlitePool, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }

    /// Same registry, counting lock waits into `stats`
    pub fn with_lock_stats(&self, stats: LockStats) -> Self {
        Self {
            db: self.db.clone(),
            retry: self.retry.clone().with_stats(stats),
        }
    }

    /// Append a priority fact
    ///
    /// With no explicit `effective_from` the fact takes effect now, nudged one
    /// microsecond past the latest existing fact so facts for a key stay
    /// strictly ordered.
    pub async fn set_priority(
        &self,
        data_type: DataType,
        source: &str,
        priority: i64,
        is_active: bool,
        effective_from: Option<DateTime<Utc>>,
    ) -> Result<SourcePriority> {
        if source.trim().is_empty() {
            return Err(Error::InvalidInput("source must not be empty".to_string()));
        }

        let effective_from = match effective_from {
            Some(at) => at,
            None => {
                let now = time::now();
                match self.latest(data_type, source).await? {
                    Some(latest) if latest.effective_from >= now => {
                        latest.effective_from + Duration::microseconds(1)
                    }
                    _ => now,
                }
            }
        };
        let effective = time::to_storage(&effective_from);
        let recorded = time::to_storage(&time::now());

        let id = retry_on_lock("priority::set", &self.retry, || async {
            let result = sqlx::query(
                r#"
                INSERT INTO source_priority (data_type, source, priority, is_active, effective_from, recorded_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(data_type.as_str())
            .bind(source)
            .bind(priority)
            .bind(is_active)
            .bind(&effective)
            .bind(&recorded)
            .execute(&self.db)
            .await;

            match result {
                Ok(done) => Ok(done.last_insert_rowid()),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    Err(Error::InvalidInput(format!(
                        "a priority fact for ({}, {}) already takes effect at {}",
                        data_type, source, effective
                    )))
                }
                Err(e) => Err(Error::Database(e)),
            }
        })
        .await?;

        info!(
            data_type = %data_type,
            source = source,
            priority,
            is_active,
            effective_from = %effective,
            "Recorded source priority fact"
        );

        self.get(id).await?.ok_or_else(|| Error::Internal(format!("priority fact {} vanished", id)))
    }

    /// Append a fact that deactivates a source, keeping its last rank
    pub async fn deactivate(&self, data_type: DataType, source: &str) -> Result<SourcePriority> {
        let latest = self.latest(data_type, source).await?.ok_or_else(|| {
            Error::NotFound(format!("no priority configured for ({}, {})", data_type, source))
        })?;
        self.set_priority(data_type, source, latest.priority, false, None).await
    }

    /// Append a fact that re-activates a source, keeping its last rank
    pub async fn activate(&self, data_type: DataType, source: &str) -> Result<SourcePriority> {
        let latest = self.latest(data_type, source).await?.ok_or_else(|| {
            Error::NotFound(format!("no priority configured for ({}, {})", data_type, source))
        })?;
        self.set_priority(data_type, source, latest.priority, true, None).await
    }

    /// Fact in force for `(data_type, source)` at `at`
    pub async fn effective_at(
        &self,
        data_type: DataType,
        source: &str,
        at: &DateTime<Utc>,
    ) -> Result<Option<SourcePriority>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {FACT_COLUMNS}
            FROM source_priority
            WHERE data_type = ? AND source = ? AND effective_from <= ?
            ORDER BY effective_from DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(data_type.as_str())
        .bind(source)
        .bind(time::to_storage(at))
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(row_to_fact).transpose()
    }

    /// All facts for a data type in force at `at`, keyed by source
    pub async fn snapshot(&self, data_type: DataType, at: &DateTime<Utc>) -> Result<PrioritySnapshot> {
        Ok(PrioritySnapshot::from_facts(self.facts_at(Some(data_type), at).await?))
    }

    /// Facts in force now, optionally for one data type
    pub async fn current(&self, data_type: Option<DataType>) -> Result<Vec<SourcePriority>> {
        self.facts_at(data_type, &time::now()).await
    }

    /// Every fact ever recorded for `(data_type, source)`, oldest first
    pub async fn history(&self, data_type: DataType, source: &str) -> Result<Vec<SourcePriority>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {FACT_COLUMNS}
            FROM source_priority
            WHERE data_type = ? AND source = ?
            ORDER BY effective_from, id
            "#
        ))
        .bind(data_type.as_str())
        .bind(source)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_fact).collect()
    }

    /// Bring the registry in line with a configuration
    ///
    /// Appends a fact for every entry that differs from what is in force and
    /// deactivates configured sources the file no longer lists. Returns the
    /// number of facts appended; applying the same file twice appends nothing.
    pub async fn apply_config(
        &self,
        entries: &[PriorityEntry],
        effective_from: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let current = self.current(None).await?;
        let mut appended = 0;

        for entry in entries {
            let in_force = current
                .iter()
                .find(|f| f.data_type == entry.data_type && f.source == entry.source);
            let unchanged = in_force
                .map(|f| f.priority == entry.priority && f.is_active == entry.active)
                .unwrap_or(false);
            if !unchanged {
                self.set_priority(
                    entry.data_type,
                    &entry.source,
                    entry.priority,
                    entry.active,
                    effective_from,
                )
                .await?;
                appended += 1;
            }
        }

        for fact in current.iter().filter(|f| f.is_active) {
            let listed = entries
                .iter()
                .any(|e| e.data_type == fact.data_type && e.source == fact.source);
            if !listed {
                info!(
                    data_type = %fact.data_type,
                    source = %fact.source,
                    "Source no longer configured, deactivating"
                );
                self.set_priority(fact.data_type, &fact.source, fact.priority, false, effective_from)
                    .await?;
                appended += 1;
            }
        }

        info!(appended, "Applied source priority configuration");
        Ok(appended)
    }

    /// Read a priority file and apply it
    pub async fn load_file(&self, path: &Path) -> Result<usize> {
        let content = read_priority_file(path).await?;
        self.apply_file_content(path, &content).await
    }

    /// Apply a priority file only if its content changed since it was last applied
    ///
    /// Returns `None` when the file is as last applied, so facts recorded by
    /// hand since then stay in force.
    pub async fn load_file_if_changed(&self, path: &Path) -> Result<Option<usize>> {
        let content = read_priority_file(path).await?;
        let applied: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM applied_priority_files WHERE path = ?")
                .bind(path.to_string_lossy().as_ref())
                .fetch_optional(&self.db)
                .await?;

        if applied.as_deref() == Some(text_hash(&content).as_str()) {
            debug!("Priority file {} unchanged since last applied", path.display());
            return Ok(None);
        }
        self.apply_file_content(path, &content).await.map(Some)
    }

    async fn apply_file_content(&self, path: &Path, content: &str) -> Result<usize> {
        let entries = parse_priority_config(content)?;
        info!("Loaded {} priority entries from {}", entries.len(), path.display());
        let appended = self.apply_config(&entries, None).await?;

        let key = path.to_string_lossy();
        let hash = text_hash(content);
        let applied_at = time::to_storage(&time::now());
        retry_on_lock("priority::record_file", &self.retry, || async {
            sqlx::query(
                r#"
                INSERT INTO applied_priority_files (path, content_hash, applied_at)
                VALUES (?, ?, ?)
                ON CONFLICT (path) DO UPDATE SET
                    content_hash = excluded.content_hash,
                    applied_at = excluded.applied_at
                "#,
            )
            .bind(key.as_ref())
            .bind(&hash)
            .bind(&applied_at)
            .execute(&self.db)
            .await?;
            Ok::<_, Error>(())
        })
        .await?;

        Ok(appended)
    }

    async fn latest(&self, data_type: DataType, source: &str) -> Result<Option<SourcePriority>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {FACT_COLUMNS}
            FROM source_priority
            WHERE data_type = ? AND source = ?
            ORDER BY effective_from DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(data_type.as_str())
        .bind(source)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(row_to_fact).transpose()
    }

    async fn get(&self, id: i64) -> Result<Option<SourcePriority>> {
        let row = sqlx::query(&format!("SELECT {FACT_COLUMNS} FROM source_priority WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(row_to_fact).transpose()
    }

    async fn facts_at(&self, data_type: Option<DataType>, at: &DateTime<Utc>) -> Result<Vec<SourcePriority>> {
        let at = time::to_storage(at);
        let rows = sqlx::query(
            r#"
            SELECT sp.id, sp.data_type, sp.source, sp.priority, sp.is_active,
                   sp.effective_from, sp.recorded_at
            FROM source_priority sp
            WHERE (?1 IS NULL OR sp.data_type = ?1)
              AND sp.id = (
                  SELECT s2.id FROM source_priority s2
                  WHERE s2.data_type = sp.data_type
                    AND s2.source = sp.source
                    AND s2.effective_from <= ?2
                  ORDER BY s2.effective_from DESC, s2.id DESC
                  LIMIT 1
              )
            ORDER BY sp.data_type, sp.priority, sp.source
            "#,
        )
        .bind(data_type.map(|d| d.as_str()))
        .bind(&at)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_fact).collect()
    }
}

fn row_to_fact(row: &SqliteRow) -> Result<SourcePriority> {
    let data_type: String = row.try_get("data_type")?;
    let effective_from: String = row.try_get("effective_from")?;
    let recorded_at: String = row.try_get("recorded_at")?;

    Ok(SourcePriority {
        id: row.try_get("id")?,
        data_type: data_type.parse()?,
        source: row.try_get("source")?,
        priority: row.try_get("priority")?,
        is_active: row.try_get("is_active")?,
        effective_from: time::from_storage(&effective_from)?,
        recorded_at: time::from_storage(&recorded_at)?,
    })
}
