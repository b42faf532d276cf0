//! Raw observations and source priority facts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spr_common::{Error, Result};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of fact a source reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Commodity prices (exchange feeds, agency quotes)
    Price,
    /// Weather station readings
    Weather,
    /// Market reports and indices
    MarketReport,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Price => "price",
            DataType::Weather => "weather",
            DataType::MarketReport => "market_report",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "price" => Ok(DataType::Price),
            "weather" => Ok(DataType::Weather),
            "market_report" => Ok(DataType::MarketReport),
            other => Err(Error::InvalidInput(format!("Unknown data type: {:?}", other))),
        }
    }
}

/// One observation as handed over by a source adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationInput {
    pub data_type: DataType,
    pub entity_key: String,
    pub timestamp: DateTime<Utc>,
    /// Source-specific structured payload, stored verbatim
    pub payload: serde_json::Value,
}

impl ObservationInput {
    pub fn new(
        data_type: DataType,
        entity_key: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            data_type,
            entity_key: entity_key.into(),
            timestamp,
            payload,
        }
    }
}

/// A staged observation; never mutated after insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub id: i64,
    pub source: String,
    pub data_type: DataType,
    pub entity_key: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
    /// Run that staged the row, when staged through the batch ingester
    pub run_id: Option<Uuid>,
}

/// Result of a staging call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// New row inserted
    Accepted { observation_id: i64, content_hash: String },
    /// Identical content already staged; nothing written
    Duplicate { content_hash: String },
}

impl StageOutcome {
    pub fn accepted(&self) -> bool {
        matches!(self, StageOutcome::Accepted { .. })
    }

    pub fn reason(&self) -> &'static str {
        match self {
            StageOutcome::Accepted { .. } => "accepted",
            StageOutcome::Duplicate { .. } => "duplicate",
        }
    }

    pub fn content_hash(&self) -> &str {
        match self {
            StageOutcome::Accepted { content_hash, .. } | StageOutcome::Duplicate { content_hash } => {
                content_hash
            }
        }
    }
}

/// One priority fact: `(data_type, source)` ranked from `effective_from` on
///
/// Lower `priority` means higher precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePriority {
    pub id: i64,
    pub data_type: DataType,
    pub source: String,
    pub priority: i64,
    pub is_active: bool,
    pub effective_from: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_parses_case_insensitively() {
        assert_eq!("PRICE".parse::<DataType>().unwrap(), DataType::Price);
        assert_eq!(" market_report ".parse::<DataType>().unwrap(), DataType::MarketReport);
        assert!("futures".parse::<DataType>().is_err());
    }

    #[test]
    fn test_data_type_string_form_round_trips_through_serde() {
        let json = serde_json::to_string(&DataType::MarketReport).unwrap();
        assert_eq!(json, "\"market_report\"");
    }

    #[test]
    fn test_stage_outcome_reason() {
        let dup = StageOutcome::Duplicate { content_hash: "ab".to_string() };
        assert!(!dup.accepted());
        assert_eq!(dup.reason(), "duplicate");
        assert_eq!(dup.content_hash(), "ab");
    }
}
