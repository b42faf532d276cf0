//! # SPR Common Library
//!
//! Shared code for the SPR observation pipeline crates including:
//! - Error type and result alias
//! - Configuration loading and root folder resolution
//! - SQLite pool initialization, schema and migrations
//! - Bounded lock-retry policy and monitored transactions
//! - Timestamp and identifier helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;
pub mod uuid_utils;

pub use config::PipelineConfig;
pub use error::{Error, Result};
