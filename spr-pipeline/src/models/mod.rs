//! Pipeline data model
//!
//! Raw observations and metrics are write-once; canonical records are upserted
//! under the resolution rule; ingestion runs move `running -> completed|failed`
//! exactly once.

pub mod canonical;
pub mod metric;
pub mod observation;
pub mod report;
pub mod run;

pub use canonical::{CanonicalRecord, CanonicalValues, Granularity, PriceFields, ReportFields, WeatherFields};
pub use metric::{CheckpointResult, MetricSummary, PerformanceMetric, PerformanceSample, StorageFootprint};
pub use observation::{DataType, ObservationInput, RawObservation, SourcePriority, StageOutcome};
pub use report::{DailyReport, DataStatus, Issue, IssueKind, ReportTotals};
pub use run::{IngestionRun, RunCounts, RunFilter, RunStatus, RunSummary};
