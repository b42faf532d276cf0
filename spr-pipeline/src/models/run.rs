//! Ingestion run state machine
//!
//! A run is created `running` and closed exactly once, as `completed` or
//! `failed`. There are no other transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spr_common::{Error, Result};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ingestion run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(Error::InvalidInput(format!("Unknown run status: {:?}", other))),
        }
    }
}

/// Record counters carried by a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Every record looked at, duplicates included
    pub processed: u64,
    /// New raw observations staged
    pub inserted: u64,
    /// Canonical records created or changed by this run's resolution pass
    pub updated: u64,
    /// Records rejected (malformed, invalid, contention)
    pub failed: u64,
}

impl RunCounts {
    pub fn duplicates(&self) -> u64 {
        self.processed
            .saturating_sub(self.inserted)
            .saturating_sub(self.failed)
    }
}

/// One bounded execution of staging a batch from one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRun {
    pub id: Uuid,
    pub source: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub error_message: Option<String>,
}

impl IngestionRun {
    /// Wall-clock duration, up to `now` for runs still open
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).num_milliseconds().max(0)
    }
}

/// Filter for run listings; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub source: Option<String>,
    pub status: Option<RunStatus>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// Per-source aggregate over a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub source: String,
    pub runs: u64,
    pub failures: u64,
    pub still_running: u64,
    pub records_inserted: u64,
    pub records_updated: u64,
    pub records_failed: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: i64,
    pub first_run: DateTime<Utc>,
    pub last_run: DateTime<Utc>,
}

impl RunSummary {
    /// Share of closed runs that completed, in percent
    pub fn success_rate(&self) -> f64 {
        let closed = self.runs.saturating_sub(self.still_running);
        if closed == 0 {
            return 0.0;
        }
        (closed - self.failures.min(closed)) as f64 / closed as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_duplicates_derived_from_counts() {
        let counts = RunCounts { processed: 10, inserted: 6, updated: 2, failed: 1 };
        assert_eq!(counts.duplicates(), 3);
    }

    #[test]
    fn test_success_rate_ignores_open_runs() {
        let now = Utc::now();
        let summary = RunSummary {
            source: "CEPEA".to_string(),
            runs: 5,
            failures: 1,
            still_running: 1,
            records_inserted: 0,
            records_updated: 0,
            records_failed: 0,
            avg_duration_ms: 0.0,
            max_duration_ms: 0,
            first_run: now,
            last_run: now,
        };
        assert!((summary.success_rate() - 75.0).abs() < f64::EPSILON);
    }
}
