//! Shared fixtures for pipeline integration tests
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use spr_common::PipelineConfig;
use spr_pipeline::ingest::BatchRecord;
use spr_pipeline::models::{DataType, ObservationInput};
use spr_pipeline::Pipeline;
use tempfile::TempDir;

/// Fresh pipeline over a database in a temporary directory
///
/// Keep the `TempDir` alive for the duration of the test.
pub async fn open_pipeline() -> (TempDir, Pipeline) {
    open_pipeline_with(PipelineConfig::default()).await
}

pub async fn open_pipeline_with(config: PipelineConfig) -> (TempDir, Pipeline) {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("spr.db");
    let pipeline = Pipeline::open(&db_path, config).await.unwrap();
    (dir, pipeline)
}

pub fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

pub fn price_payload(value: f64) -> Value {
    json!({ "preco_real": value, "unidade": "R$/sc 60kg" })
}

pub fn price(entity_key: &str, ts: DateTime<Utc>, value: f64) -> ObservationInput {
    ObservationInput::new(DataType::Price, entity_key, ts, price_payload(value))
}

pub fn batch_price(entity_key: &str, date: &str, value: f64) -> BatchRecord {
    BatchRecord {
        data_type: "price".to_string(),
        entity_key: entity_key.to_string(),
        timestamp: date.to_string(),
        payload: price_payload(value),
    }
}

/// Register an active price source
pub async fn rank(pipeline: &Pipeline, source: &str, priority: i64) {
    pipeline
        .registry
        .set_priority(DataType::Price, source, priority, true, None)
        .await
        .unwrap();
}

/// CEPEA ahead of IMEA for prices
pub async fn standard_priorities(pipeline: &Pipeline) {
    rank(pipeline, "CEPEA", 1).await;
    rank(pipeline, "IMEA", 2).await;
}
