//! Performance samples, summaries and WAL maintenance

mod helpers;

use helpers::{day, open_pipeline, price};
use spr_common::Error;
use spr_pipeline::models::PerformanceSample;

fn sample(source: &str, latency_ms: u64, throughput: f64, lock_waits: u64) -> PerformanceSample {
    PerformanceSample {
        source: source.to_string(),
        latency_ms,
        throughput_records_per_sec: throughput,
        storage_size: 4096,
        wal_size: 0,
        lock_waits,
        run_id: None,
    }
}

#[tokio::test]
async fn test_record_and_list_newest_first() {
    let (_dir, pipeline) = open_pipeline().await;

    let first = pipeline.telemetry.record(&sample("CEPEA", 120, 50.0, 0)).await.unwrap();
    let second = pipeline.telemetry.record(&sample("CEPEA", 80, 75.0, 2)).await.unwrap();
    pipeline.telemetry.record(&sample("IMEA", 300, 10.0, 0)).await.unwrap();

    let cepea = pipeline.telemetry.list(Some("CEPEA"), None, None).await.unwrap();
    assert_eq!(cepea.len(), 2);
    assert_eq!(cepea[0].id, second);
    assert_eq!(cepea[1].id, first);
    assert_eq!(cepea[0].sample.lock_waits, 2);

    let limited = pipeline.telemetry.list(None, None, Some(1)).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_summary_aggregates_per_source() {
    let (_dir, pipeline) = open_pipeline().await;
    pipeline.telemetry.record(&sample("CEPEA", 100, 40.0, 1)).await.unwrap();
    pipeline.telemetry.record(&sample("CEPEA", 300, 60.0, 3)).await.unwrap();
    pipeline.telemetry.record(&sample("IMEA", 50, 10.0, 0)).await.unwrap();

    let summaries = pipeline.telemetry.summary(None).await.unwrap();
    assert_eq!(summaries.len(), 2);

    let cepea = &summaries[0];
    assert_eq!(cepea.source, "CEPEA");
    assert_eq!(cepea.samples, 2);
    assert!((cepea.avg_latency_ms - 200.0).abs() < 1e-9);
    assert_eq!(cepea.max_latency_ms, 300);
    assert!((cepea.avg_throughput - 50.0).abs() < 1e-9);
    assert_eq!(cepea.total_lock_waits, 4);

    let later = pipeline
        .telemetry
        .summary(Some(chrono::Utc::now() + chrono::Duration::hours(1)))
        .await
        .unwrap();
    assert!(later.is_empty());
}

#[tokio::test]
async fn test_invalid_samples_are_rejected() {
    let (_dir, pipeline) = open_pipeline().await;

    for bad in [sample("", 1, 1.0, 0), sample("CEPEA", 1, f64::NAN, 0), sample("CEPEA", 1, -2.0, 0)] {
        let result = pipeline.telemetry.record(&bad).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
    assert!(pipeline.telemetry.list(None, None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_storage_footprint_reports_database_size() {
    let (_dir, pipeline) = open_pipeline().await;
    pipeline.staging.stage("CEPEA", &price("SOJA:MT", day(2025, 1, 7), 145.5)).await.unwrap();

    let footprint = pipeline.telemetry.storage_footprint().await.unwrap();
    assert!(footprint.database_bytes > 0);
}

#[tokio::test]
async fn test_checkpoint_only_above_threshold() {
    let (_dir, pipeline) = open_pipeline().await;
    for d in 1..=5 {
        pipeline
            .staging
            .stage("CEPEA", &price("SOJA:MT", day(2025, 1, d), 140.0 + d as f64))
            .await
            .unwrap();
    }

    let skipped = pipeline.telemetry.checkpoint_if_needed(u64::MAX).await.unwrap();
    assert!(skipped.is_none());

    let wal_before = pipeline.telemetry.storage_footprint().await.unwrap().wal_bytes;
    assert!(wal_before > 0);

    let done = pipeline.telemetry.checkpoint_if_needed(0).await.unwrap();
    assert!(done.is_some());
}
