//! Daily status report rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MetricSummary, RunSummary};

/// What the staging table holds for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStatus {
    pub source: String,
    pub records: u64,
    pub entities: u64,
    pub first_observation: DateTime<Utc>,
    pub last_observation: DateTime<Utc>,
    /// Calendar days from first to last observation, inclusive
    pub coverage_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    FailedRuns,
    LowSuccessRate,
    SlowRuns,
    StaleData,
}

/// Something an operator should look at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub source: String,
    pub kind: IssueKind,
    pub message: String,
}

/// Totals across every source in the report window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportTotals {
    pub records: u64,
    pub runs: u64,
    pub failures: u64,
    /// Percent of closed runs that completed; 100 when none closed
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub generated_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub totals: ReportTotals,
    pub runs: Vec<RunSummary>,
    pub data_status: Vec<DataStatus>,
    pub performance: Vec<MetricSummary>,
    pub issues: Vec<Issue>,
}
