//! Performance telemetry rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Measurements taken for one run or sampling interval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub source: String,
    pub latency_ms: u64,
    pub throughput_records_per_sec: f64,
    /// Main database file size in bytes
    pub storage_size: u64,
    /// Write-ahead log size in bytes
    pub wal_size: u64,
    pub lock_waits: u64,
    pub run_id: Option<Uuid>,
}

/// A stored, append-only metric row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub sample: PerformanceSample,
}

/// Per-source aggregate of metrics over a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub source: String,
    pub samples: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub avg_throughput: f64,
    pub max_storage_size: u64,
    pub max_wal_size: u64,
    pub total_lock_waits: u64,
}

/// On-disk size of the database at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageFootprint {
    pub database_bytes: u64,
    pub wal_bytes: u64,
}

/// Result row of `PRAGMA wal_checkpoint`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointResult {
    /// Checkpoint could not complete because of concurrent readers or writers
    pub busy: bool,
    pub log_frames: i64,
    pub checkpointed_frames: i64,
}
