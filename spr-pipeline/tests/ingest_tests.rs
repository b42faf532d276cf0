//! Batch ingestion: runs, staging, resolution and telemetry together

mod helpers;

use helpers::{batch_price, day, open_pipeline, open_pipeline_with, standard_priorities};
use serde_json::json;
use spr_common::PipelineConfig;
use spr_pipeline::ingest::{load_batch_file, BatchRecord};
use spr_pipeline::models::{Granularity, RunFilter, RunStatus};
use spr_pipeline::Pipeline;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn soy_week() -> Vec<BatchRecord> {
    vec![
        batch_price("SOJA:MT", "2025-01-06", 144.90),
        batch_price("SOJA:MT", "2025-01-07", 145.50),
        batch_price("MILHO:PR", "2025-01-07", 61.20),
    ]
}

#[tokio::test]
async fn test_batch_is_staged_and_resolved() {
    let (_dir, pipeline) = open_pipeline().await;
    standard_priorities(&pipeline).await;

    let report = pipeline
        .ingester
        .ingest("CEPEA", &soy_week(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert!(!report.cancelled);
    assert_eq!(report.counts.processed, 3);
    assert_eq!(report.counts.inserted, 3);
    assert_eq!(report.counts.updated, 3);
    assert_eq!(report.counts.failed, 0);
    assert_eq!(report.keys_resolved, 3);
    assert!(report.failures.is_empty());

    let record = pipeline
        .resolver
        .latest_canonical("SOJA:MT", Granularity::Daily)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.bucket_start, day(2025, 1, 7));
    assert_eq!(record.winning_source, "CEPEA");

    let run = pipeline.runs.get_run(report.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counts, report.counts);
}

#[tokio::test]
async fn test_bad_record_does_not_stop_the_batch() {
    let (_dir, pipeline) = open_pipeline().await;
    standard_priorities(&pipeline).await;

    let mut records = soy_week();
    records.insert(
        1,
        BatchRecord {
            data_type: "price".to_string(),
            entity_key: "SOJA:GO".to_string(),
            timestamp: "2025-01-07".to_string(),
            payload: json!("not an object"),
        },
    );

    let report = pipeline
        .ingester
        .ingest("CEPEA", &records, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.counts.processed, 4);
    assert_eq!(report.counts.inserted, 3);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, Some(1));
    assert_eq!(report.failures[0].entity_key, "SOJA:GO");
}

#[tokio::test]
async fn test_rerun_of_same_batch_inserts_nothing() {
    let (_dir, pipeline) = open_pipeline().await;
    standard_priorities(&pipeline).await;
    let token = CancellationToken::new();

    pipeline.ingester.ingest("CEPEA", &soy_week(), None, &token).await.unwrap();
    let rerun = pipeline.ingester.ingest("CEPEA", &soy_week(), None, &token).await.unwrap();

    assert_eq!(rerun.status, RunStatus::Completed);
    assert_eq!(rerun.counts.processed, 3);
    assert_eq!(rerun.counts.inserted, 0);
    assert_eq!(rerun.counts.updated, 0);
    assert_eq!(rerun.counts.duplicates(), 3);
    assert_eq!(pipeline.staging.count(Some("CEPEA")).await.unwrap(), 3);
}

#[tokio::test]
async fn test_cancelled_batch_fails_its_run() {
    let (_dir, pipeline) = open_pipeline().await;
    let token = CancellationToken::new();
    token.cancel();

    let report = pipeline.ingester.ingest("IMEA", &soy_week(), None, &token).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.counts.processed, 0);
    assert_eq!(pipeline.staging.count(None).await.unwrap(), 0);

    let run = pipeline.runs.get_run(report.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_message.unwrap().starts_with("cancelled"));
}

#[tokio::test]
async fn test_cancel_mid_batch_keeps_what_was_staged() {
    let (_dir, pipeline) = open_pipeline().await;
    standard_priorities(&pipeline).await;

    let records: Vec<BatchRecord> = (1..=10)
        .map(|d| batch_price("SOJA:MT", &format!("2025-03-{:02}", d), 140.0 + d as f64))
        .collect();
    let token = CancellationToken::new();
    let on_progress = token.clone();
    let ingester = pipeline
        .ingester
        .clone()
        .with_progress_interval(3)
        .with_progress_hook(Arc::new(move |progress| {
            if progress.processed >= 3 {
                on_progress.cancel();
            }
        }));

    let report = ingester.ingest("CEPEA", &records, None, &token).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.counts.processed, 3);
    assert_eq!(report.counts.inserted, 3);
    assert_eq!(report.keys_resolved, 0);
    assert_eq!(pipeline.staging.count(Some("CEPEA")).await.unwrap(), 3);

    let run = pipeline.runs.get_run(report.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.counts.processed, 3);
    assert!(run.error_message.unwrap().starts_with("cancelled after 3 of 10"));

    // Cancelled batches are not resolved
    assert!(pipeline
        .resolver
        .latest_canonical("SOJA:MT", Granularity::Daily)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_storage_failure_aborts_the_run() {
    let (_dir, pipeline) = open_pipeline().await;
    standard_priorities(&pipeline).await;
    sqlx::query("DROP TABLE raw_observations")
        .execute(&pipeline.db)
        .await
        .unwrap();

    let err = pipeline
        .ingester
        .ingest("CEPEA", &soy_week(), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(!err.is_record_level());

    let runs = pipeline
        .runs
        .list_runs(&RunFilter {
            source: Some("CEPEA".to_string()),
            ..RunFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].counts.processed, 1);
    assert!(runs[0].error_message.as_deref().unwrap().contains("no such table"));

    // The aborted run still leaves its sample
    let samples = pipeline.telemetry.list(Some("CEPEA"), None, None).await.unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].sample.run_id, Some(runs[0].id));
}

/// Pipeline whose inserts for `entity_key` always fail as locked
async fn pipeline_with_locked_key(entity_key: &str) -> (tempfile::TempDir, Pipeline) {
    let config = PipelineConfig {
        max_lock_wait_ms: 100,
        ..PipelineConfig::default()
    };
    let (dir, pipeline) = open_pipeline_with(config).await;
    standard_priorities(&pipeline).await;
    sqlx::query(&format!(
        r#"
        CREATE TRIGGER always_locked BEFORE INSERT ON raw_observations
        WHEN NEW.entity_key = '{}'
        BEGIN
            SELECT RAISE(ABORT, 'database is locked');
        END
        "#,
        entity_key
    ))
    .execute(&pipeline.db)
    .await
    .unwrap();
    (dir, pipeline)
}

#[tokio::test]
async fn test_contended_record_fails_alone() {
    let (_dir, pipeline) = pipeline_with_locked_key("SOJA:GO").await;

    let mut records = soy_week();
    records.insert(1, batch_price("SOJA:GO", "2025-01-07", 147.00));

    let report = pipeline
        .ingester
        .ingest("CEPEA", &records, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.counts.processed, 4);
    assert_eq!(report.counts.inserted, 3);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, Some(1));
    assert_eq!(report.failures[0].entity_key, "SOJA:GO");
    assert_eq!(pipeline.staging.count(Some("CEPEA")).await.unwrap(), 3);

    let samples = pipeline.telemetry.list(Some("CEPEA"), None, None).await.unwrap();
    assert!(samples[0].sample.lock_waits >= 1);
}

#[tokio::test]
async fn test_lock_waits_are_counted_per_run() {
    let (_dir, pipeline) = pipeline_with_locked_key("SOJA:GO").await;

    let imea_records = vec![
        batch_price("SOJA:GO", "2025-01-07", 147.00),
        batch_price("SOJA:MT", "2025-01-07", 146.00),
    ];
    let cepea_records: Vec<BatchRecord> = (1..=20)
        .map(|d| batch_price("SOJA:MT", &format!("2025-02-{:02}", d), 140.0 + d as f64))
        .collect();

    let imea = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .ingester
                .ingest("IMEA", &imea_records, None, &CancellationToken::new())
                .await
        })
    };
    let cepea = pipeline
        .ingester
        .ingest("CEPEA", &cepea_records, None, &CancellationToken::new())
        .await
        .unwrap();
    let imea = imea.await.unwrap().unwrap();
    assert_eq!(imea.counts.failed, 1);
    assert_eq!(cepea.counts.failed, 0);

    let imea_sample = &pipeline.telemetry.list(Some("IMEA"), None, None).await.unwrap()[0];
    let cepea_sample = &pipeline.telemetry.list(Some("CEPEA"), None, None).await.unwrap()[0];
    assert!(imea_sample.sample.lock_waits >= 1);
    assert_eq!(cepea_sample.sample.lock_waits, 0);
    assert!(pipeline.lock_stats.total() >= imea_sample.sample.lock_waits);
}

#[tokio::test]
async fn test_each_run_leaves_a_performance_sample() {
    let (_dir, pipeline) = open_pipeline().await;
    standard_priorities(&pipeline).await;

    let report = pipeline
        .ingester
        .ingest("CEPEA", &soy_week(), None, &CancellationToken::new())
        .await
        .unwrap();

    let samples = pipeline.telemetry.list(Some("CEPEA"), None, None).await.unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].sample.run_id, Some(report.run_id));
    assert!(samples[0].sample.storage_size > 0);
}

#[tokio::test]
async fn test_resolution_can_be_turned_off() {
    let config = PipelineConfig {
        resolve_after_ingest: false,
        ..PipelineConfig::default()
    };
    let (_dir, pipeline) = open_pipeline_with(config).await;
    standard_priorities(&pipeline).await;

    let report = pipeline
        .ingester
        .ingest("CEPEA", &soy_week(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.counts.inserted, 3);
    assert_eq!(report.keys_resolved, 0);
    assert!(pipeline
        .resolver
        .latest_canonical("SOJA:MT", Granularity::Daily)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_two_sources_ingest_concurrently() {
    let (_dir, pipeline) = open_pipeline().await;
    standard_priorities(&pipeline).await;

    let imea_records: Vec<BatchRecord> = (1..=20)
        .map(|d| batch_price("SOJA:MT", &format!("2025-02-{:02}", d), 150.0 + d as f64))
        .collect();
    let cepea_records: Vec<BatchRecord> = (1..=20)
        .map(|d| batch_price("SOJA:MT", &format!("2025-02-{:02}", d), 140.0 + d as f64))
        .collect();

    let imea = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .ingester
                .ingest("IMEA", &imea_records, None, &CancellationToken::new())
                .await
        })
    };
    let cepea = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .ingester
                .ingest("CEPEA", &cepea_records, None, &CancellationToken::new())
                .await
        })
    };

    let imea = imea.await.unwrap().unwrap();
    let cepea = cepea.await.unwrap().unwrap();
    assert_eq!(imea.status, RunStatus::Completed);
    assert_eq!(cepea.status, RunStatus::Completed);
    assert_eq!(imea.counts.inserted + cepea.counts.inserted, 40);

    // Whatever the interleaving, CEPEA wins every day
    let records = pipeline
        .resolver
        .get_canonical("SOJA:MT", day(2025, 2, 1), day(2025, 2, 20), Granularity::Daily)
        .await
        .unwrap();
    assert_eq!(records.len(), 20);
    assert!(records.iter().all(|r| r.winning_source == "CEPEA"));
}

#[tokio::test]
async fn test_load_batch_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("cepea.json");
    std::fs::write(
        &path,
        r#"[
            {"data_type": "price", "entity_key": "SOJA:MT", "timestamp": "2025-01-07",
             "payload": {"preco_real": 145.5}},
            {"data_type": "weather", "entity_key": "SORRISO", "timestamp": "2025-01-07T12:00:00Z",
             "payload": {"precipitacao_mm": 12.4}}
        ]"#,
    )
    .unwrap();

    let records = load_batch_file(&path).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].data_type, "weather");
}
