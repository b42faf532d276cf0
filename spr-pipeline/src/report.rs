//! Daily status report
//!
//! Per-source data status read from the staging table, run health and
//! telemetry over a recent window, and the issues worth an operator's
//! attention: failed runs, a low success rate, slow runs and stale data.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use spr_common::{time, PipelineConfig, Result};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::models::{DailyReport, DataStatus, Issue, IssueKind, ReportTotals, RunSummary};
use crate::runs::RunTracker;
use crate::telemetry::Telemetry;

/// Limits past which [`detect_issues`] raises an issue
#[derive(Debug, Clone, PartialEq)]
pub struct IssueThresholds {
    /// Sources without an entry are never reported stale
    pub freshness_max_days: BTreeMap<String, u64>,
    pub min_success_rate_pct: f64,
    pub slow_run_ms: u64,
}

impl IssueThresholds {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            freshness_max_days: config.freshness_max_days.clone(),
            min_success_rate_pct: config.min_success_rate_pct,
            slow_run_ms: config.slow_run_ms,
        }
    }
}

/// Issues raised by run summaries and data status as of `today`
pub fn detect_issues(
    runs: &[RunSummary],
    status: &[DataStatus],
    thresholds: &IssueThresholds,
    today: NaiveDate,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut raise = |source: &str, kind: IssueKind, message: String| {
        issues.push(Issue {
            source: source.to_string(),
            kind,
            message,
        })
    };

    for summary in runs {
        if summary.failures > 0 {
            raise(
                &summary.source,
                IssueKind::FailedRuns,
                format!("{} of {} runs failed", summary.failures, summary.runs),
            );
        }

        // Runs still open say nothing about success yet
        let closed = summary.runs.saturating_sub(summary.still_running);
        if closed > 0 && summary.success_rate() < thresholds.min_success_rate_pct {
            raise(
                &summary.source,
                IssueKind::LowSuccessRate,
                format!("success rate {:.1}%", summary.success_rate()),
            );
        }

        if summary.avg_duration_ms > thresholds.slow_run_ms as f64 {
            raise(
                &summary.source,
                IssueKind::SlowRuns,
                format!("average run took {:.1}s", summary.avg_duration_ms / 1000.0),
            );
        }
    }

    for data in status {
        let Some(max_days) = thresholds.freshness_max_days.get(&data.source) else {
            continue;
        };
        let days_old = (today - data.last_observation.date_naive()).num_days();
        if days_old > *max_days as i64 {
            raise(
                &data.source,
                IssueKind::StaleData,
                format!("newest observation is {} days old (limit {})", days_old, max_days),
            );
        }
    }

    issues
}

#[derive(Clone)]
pub struct Reporter {
    db: SqlitePool,
    runs: RunTracker,
    telemetry: Telemetry,
    thresholds: IssueThresholds,
}

impl Reporter {
    pub fn new(db: SqlitePool, runs: RunTracker, telemetry: Telemetry, thresholds: IssueThresholds) -> Self {
        Self {
            db,
            runs,
            telemetry,
            thresholds,
        }
    }

    /// Record count, distinct entities and observation span per source
    pub async fn data_status(&self) -> Result<Vec<DataStatus>> {
        let rows = sqlx::query(
            r#"
            SELECT source,
                   COUNT(*) AS records,
                   COUNT(DISTINCT entity_key) AS entities,
                   MIN(timestamp) AS first_observation,
                   MAX(timestamp) AS last_observation
            FROM raw_observations
            GROUP BY source
            ORDER BY source
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                let first: String = row.try_get("first_observation")?;
                let last: String = row.try_get("last_observation")?;
                let first_observation = time::from_storage(&first)?;
                let last_observation = time::from_storage(&last)?;
                let coverage_days = (last_observation.date_naive() - first_observation.date_naive()).num_days() + 1;

                Ok(DataStatus {
                    source: row.try_get("source")?,
                    records: row.try_get::<i64, _>("records")?.max(0) as u64,
                    entities: row.try_get::<i64, _>("entities")?.max(0) as u64,
                    first_observation,
                    last_observation,
                    coverage_days,
                })
            })
            .collect()
    }

    /// Report over runs and telemetry since `now - window`
    pub async fn daily_report(&self, now: DateTime<Utc>, window: Duration) -> Result<DailyReport> {
        let window_start = now - window;
        let runs = self.runs.summary(Some(window_start)).await?;
        let data_status = self.data_status().await?;
        let performance = self.telemetry.summary(Some(window_start)).await?;
        let issues = detect_issues(&runs, &data_status, &self.thresholds, now.date_naive());

        let total_runs: u64 = runs.iter().map(|s| s.runs).sum();
        let failures: u64 = runs.iter().map(|s| s.failures).sum();
        let closed: u64 = runs.iter().map(|s| s.runs.saturating_sub(s.still_running)).sum();
        let success_rate = if closed == 0 {
            100.0
        } else {
            (closed - failures.min(closed)) as f64 / closed as f64 * 100.0
        };
        let totals = ReportTotals {
            records: data_status.iter().map(|d| d.records).sum(),
            runs: total_runs,
            failures,
            success_rate,
        };

        for issue in &issues {
            warn!(source = %issue.source, kind = ?issue.kind, "{}", issue.message);
        }
        info!(
            records = totals.records,
            runs = totals.runs,
            issues = issues.len(),
            "Daily report generated"
        );

        Ok(DailyReport {
            generated_at: now,
            window_start,
            totals,
            runs,
            data_status,
            performance,
            issues,
        })
    }
}
