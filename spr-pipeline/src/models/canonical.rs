//! Canonical records and typed value extraction
//!
//! Payloads stay opaque `serde_json::Value` maps until a winner is chosen;
//! only then are the fields pulled into a typed [`CanonicalValues`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use spr_common::time::Granularity;

use super::DataType;

/// Price value fields (OHLCV plus a headline price)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceFields {
    pub price: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

/// Weather station reading fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherFields {
    pub temperature_max: Option<f64>,
    pub temperature_min: Option<f64>,
    pub temperature_mean: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub wind_speed: Option<f64>,
    pub pressure_hpa: Option<f64>,
}

/// Market report fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportFields {
    pub headline: Option<String>,
    pub value: Option<f64>,
}

/// Typed values of a canonical record, one shape per data type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanonicalValues {
    Price(PriceFields),
    Weather(WeatherFields),
    MarketReport(ReportFields),
}

// Field aliases accepted from source payloads, canonical name first.
const PRICE_ALIASES: &[&str] = &["price", "value", "preco", "preco_real", "preco_medio"];
const OPEN_ALIASES: &[&str] = &["open", "abertura"];
const HIGH_ALIASES: &[&str] = &["high", "maxima"];
const LOW_ALIASES: &[&str] = &["low", "minima"];
const CLOSE_ALIASES: &[&str] = &["close", "fechamento"];
const VOLUME_ALIASES: &[&str] = &["volume", "volume_negociado", "volume_estimado"];

const TEMP_MAX_ALIASES: &[&str] = &["temperature_max", "temperatura_max"];
const TEMP_MIN_ALIASES: &[&str] = &["temperature_min", "temperatura_min"];
const TEMP_MEAN_ALIASES: &[&str] = &["temperature_mean", "temperature", "temperatura_media", "temperatura"];
const HUMIDITY_ALIASES: &[&str] = &["humidity_pct", "humidity", "umidade_relativa", "umidade"];
const PRECIPITATION_ALIASES: &[&str] = &["precipitation_mm", "precipitation", "precipitacao"];
const WIND_ALIASES: &[&str] = &["wind_speed", "velocidade_vento"];
const PRESSURE_ALIASES: &[&str] = &["pressure_hpa", "pressure", "pressao_atmosferica"];

const HEADLINE_ALIASES: &[&str] = &["headline", "title", "titulo", "summary"];
const REPORT_VALUE_ALIASES: &[&str] = &["value", "index", "indice"];

/// First alias present as a number (or numeric string)
fn number(map: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    aliases.iter().find_map(|key| match map.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    })
    .filter(|v| v.is_finite())
}

fn text(map: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

impl CanonicalValues {
    /// Extract typed fields from a raw payload
    ///
    /// Returns `None` when the payload carries no usable field for the data
    /// type; the resolver then moves on to the next candidate.
    pub fn extract(data_type: DataType, payload: &Value) -> Option<Self> {
        let map = payload.as_object()?;
        match data_type {
            DataType::Price => {
                let fields = PriceFields {
                    price: number(map, PRICE_ALIASES),
                    open: number(map, OPEN_ALIASES),
                    high: number(map, HIGH_ALIASES),
                    low: number(map, LOW_ALIASES),
                    close: number(map, CLOSE_ALIASES),
                    volume: number(map, VOLUME_ALIASES),
                };
                (fields != PriceFields::default()).then_some(CanonicalValues::Price(fields))
            }
            DataType::Weather => {
                let fields = WeatherFields {
                    temperature_max: number(map, TEMP_MAX_ALIASES),
                    temperature_min: number(map, TEMP_MIN_ALIASES),
                    temperature_mean: number(map, TEMP_MEAN_ALIASES),
                    humidity_pct: number(map, HUMIDITY_ALIASES),
                    precipitation_mm: number(map, PRECIPITATION_ALIASES),
                    wind_speed: number(map, WIND_ALIASES),
                    pressure_hpa: number(map, PRESSURE_ALIASES),
                };
                (fields != WeatherFields::default()).then_some(CanonicalValues::Weather(fields))
            }
            DataType::MarketReport => {
                let fields = ReportFields {
                    headline: text(map, HEADLINE_ALIASES),
                    value: number(map, REPORT_VALUE_ALIASES),
                };
                (fields != ReportFields::default()).then_some(CanonicalValues::MarketReport(fields))
            }
        }
    }

    /// The single most representative number, for listings and reports
    pub fn headline_value(&self) -> Option<f64> {
        match self {
            CanonicalValues::Price(p) => p.price.or(p.close),
            CanonicalValues::Weather(w) => w.temperature_mean.or(w.precipitation_mm),
            CanonicalValues::MarketReport(r) => r.value,
        }
    }
}

/// The single authoritative value for `(entity_key, timestamp, granularity)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub entity_key: String,
    /// Bucket start for `granularity`
    pub timestamp: DateTime<Utc>,
    pub granularity: Granularity,
    pub data_type: DataType,
    pub values: CanonicalValues,
    pub winning_source: String,
    /// Priority of `winning_source` when the record was written
    pub winning_priority: i64,
    pub raw_observation_id: i64,
    pub resolved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_price_from_source_field_names() {
        let payload = json!({"preco_real": 145.5, "volume_negociado": 12000, "commodity": "SOJA"});
        let values = CanonicalValues::extract(DataType::Price, &payload).unwrap();
        match &values {
            CanonicalValues::Price(p) => {
                assert_eq!(p.price, Some(145.5));
                assert_eq!(p.volume, Some(12000.0));
                assert_eq!(p.open, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(values.headline_value(), Some(145.5));
    }

    #[test]
    fn test_extract_accepts_decimal_comma_strings() {
        let payload = json!({"price": "146,00"});
        let values = CanonicalValues::extract(DataType::Price, &payload).unwrap();
        assert_eq!(values.headline_value(), Some(146.0));
    }

    #[test]
    fn test_extract_weather_reading() {
        let payload = json!({"temperatura_media": 24.3, "precipitacao": 1.2, "codigo_estacao": "A001"});
        match CanonicalValues::extract(DataType::Weather, &payload).unwrap() {
            CanonicalValues::Weather(w) => {
                assert_eq!(w.temperature_mean, Some(24.3));
                assert_eq!(w.precipitation_mm, Some(1.2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_extract_without_value_fields_is_none() {
        let payload = json!({"commodity": "SOJA", "note": "holiday"});
        assert!(CanonicalValues::extract(DataType::Price, &payload).is_none());
        assert!(CanonicalValues::extract(DataType::Price, &json!([1, 2])).is_none());
    }

    #[test]
    fn test_values_serialize_with_kind_tag() {
        let values = CanonicalValues::MarketReport(ReportFields {
            headline: Some("Safra recorde".to_string()),
            value: None,
        });
        let json = serde_json::to_value(&values).unwrap();
        assert_eq!(json["kind"], "market_report");
        let back: CanonicalValues = serde_json::from_value(json).unwrap();
        assert_eq!(back, values);
    }
}
