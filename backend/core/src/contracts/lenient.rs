//! Forgiving field decoders for values produced by models.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::types::HintLevel;

/// Decode an optional field, turning values of the wrong shape into `None`.
pub fn opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Accept `"L2"`, `"l2"`, `"2"` or `2`.
pub fn hint_level<'de, D>(deserializer: D) -> Result<Option<HintLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| parse_hint_level(&v)))
}

pub fn parse_hint_level(value: &Value) -> Option<HintLevel> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .and_then(HintLevel::from_number),
        Value::String(s) => {
            let digits = s.trim().trim_start_matches(['L', 'l']);
            digits.parse::<u8>().ok().and_then(HintLevel::from_number)
        }
        _ => None,
    }
}

/// Numbers that may arrive as strings (`"0.9"`) or be missing.
pub fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().replace(',', ".").parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

/// Counts that may arrive as floats or strings.
pub fn count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let n = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(if n.is_finite() && n > 0.0 { n.round() as u32 } else { 0 })
}
