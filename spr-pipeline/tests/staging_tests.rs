//! Raw staging and content-hash deduplication

mod helpers;

use helpers::{day, open_pipeline, price};
use serde_json::json;
use spr_common::Error;
use spr_pipeline::models::{DataType, ObservationInput, StageOutcome};

#[tokio::test]
async fn test_staging_twice_stores_one_row() {
    let (_dir, pipeline) = open_pipeline().await;
    let obs = price("SOJA:MT", day(2025, 1, 7), 145.50);

    let first = pipeline.staging.stage("CEPEA", &obs).await.unwrap();
    let second = pipeline.staging.stage("CEPEA", &obs).await.unwrap();

    assert!(first.accepted());
    assert!(!second.accepted());
    assert_eq!(second.reason(), "duplicate");
    assert_eq!(first.content_hash(), second.content_hash());
    assert_eq!(pipeline.staging.count(Some("CEPEA")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_reordered_payload_is_a_duplicate() {
    let (_dir, pipeline) = open_pipeline().await;
    let a: serde_json::Value = serde_json::from_str(r#"{"preco_real":145.5,"praca":"Sorriso"}"#).unwrap();
    let b: serde_json::Value = serde_json::from_str(r#"{"praca":"Sorriso","preco_real":145.5}"#).unwrap();

    let first = pipeline
        .staging
        .stage("IMEA", &ObservationInput::new(DataType::Price, "SOJA:MT", day(2025, 1, 7), a))
        .await
        .unwrap();
    let second = pipeline
        .staging
        .stage("IMEA", &ObservationInput::new(DataType::Price, "SOJA:MT", day(2025, 1, 7), b))
        .await
        .unwrap();

    assert!(first.accepted());
    assert!(matches!(second, StageOutcome::Duplicate { .. }));
}

#[tokio::test]
async fn test_corrected_value_is_a_new_observation() {
    let (_dir, pipeline) = open_pipeline().await;

    pipeline.staging.stage("CEPEA", &price("SOJA:MT", day(2025, 1, 7), 145.50)).await.unwrap();
    let correction = pipeline.staging.stage("CEPEA", &price("SOJA:MT", day(2025, 1, 7), 145.80)).await.unwrap();

    assert!(correction.accepted());
    assert_eq!(pipeline.staging.count(None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_same_payload_from_two_sources_is_kept_twice() {
    let (_dir, pipeline) = open_pipeline().await;
    let obs = price("SOJA:MT", day(2025, 1, 7), 145.50);

    assert!(pipeline.staging.stage("CEPEA", &obs).await.unwrap().accepted());
    assert!(pipeline.staging.stage("IMEA", &obs).await.unwrap().accepted());
    assert_eq!(pipeline.staging.count(None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_malformed_payload_is_rejected_before_staging() {
    let (_dir, pipeline) = open_pipeline().await;
    let obs = ObservationInput::new(DataType::Price, "SOJA:MT", day(2025, 1, 7), json!("145.50"));

    let err = pipeline.staging.stage("CEPEA", &obs).await.unwrap_err();
    assert!(matches!(err, Error::MalformedPayload(_)));
    assert_eq!(pipeline.staging.count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_empty_identifiers_are_rejected() {
    let (_dir, pipeline) = open_pipeline().await;

    let no_source = pipeline.staging.stage("  ", &price("SOJA:MT", day(2025, 1, 7), 1.0)).await;
    assert!(matches!(no_source, Err(Error::InvalidInput(_))));

    let no_key = pipeline.staging.stage("CEPEA", &price("", day(2025, 1, 7), 1.0)).await;
    assert!(matches!(no_key, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_stored_observation_keeps_payload_and_hash() {
    let (_dir, pipeline) = open_pipeline().await;
    let outcome = pipeline.staging.stage("CEPEA", &price("SOJA:MT", day(2025, 1, 7), 145.50)).await.unwrap();

    let id = match &outcome {
        StageOutcome::Accepted { observation_id, .. } => *observation_id,
        other => panic!("expected accepted, got {:?}", other),
    };
    let stored = pipeline.staging.get(id).await.unwrap().unwrap();

    assert_eq!(stored.source, "CEPEA");
    assert_eq!(stored.data_type, DataType::Price);
    assert_eq!(stored.timestamp, day(2025, 1, 7));
    assert_eq!(stored.payload["preco_real"], json!(145.5));
    assert_eq!(stored.content_hash, outcome.content_hash());
    assert!(stored.run_id.is_none());
}

#[tokio::test]
async fn test_observations_between_is_half_open() {
    let (_dir, pipeline) = open_pipeline().await;
    for d in 6..=8 {
        pipeline.staging.stage("CEPEA", &price("SOJA:MT", day(2025, 1, d), 140.0 + d as f64)).await.unwrap();
    }
    pipeline.staging.stage("CEPEA", &price("MILHO:PR", day(2025, 1, 7), 60.0)).await.unwrap();

    let rows = pipeline
        .staging
        .observations_between("SOJA:MT", &day(2025, 1, 7), &day(2025, 1, 8))
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp, day(2025, 1, 7));
}
