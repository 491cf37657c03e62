//! Typed inputs and results for every operation.
//!
//! v1 and v2 are separate deployments with diverging shapes and live in
//! separate modules. Results ignore unknown fields on decode so stored cache
//! rows stay readable when a schema grows.

pub mod lenient;
pub mod mixed;
pub mod v1;
pub mod v2;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

pub use mixed::{MiniCheckItem, MiniCheckKind, MistakeItem};

fn default_locale() -> String {
    "ru".to_string()
}

/// Why a parse needs the user to confirm the rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationReason {
    #[default]
    None,
    LowConfidence,
    BracketedSpansPresent,
    MeaningChangeRiskHigh,
    HasDiagramsOrLowQuality,
}

impl ConfirmationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationReason::None => "none",
            ConfirmationReason::LowConfidence => "low_confidence",
            ConfirmationReason::BracketedSpansPresent => "bracketed_spans_present",
            ConfirmationReason::MeaningChangeRiskHigh => "meaning_change_risk_high",
            ConfirmationReason::HasDiagramsOrLowQuality => "has_diagrams_or_low_quality",
        }
    }
}

impl fmt::Display for ConfirmationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfirmationReason {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" | "" => Ok(ConfirmationReason::None),
            "low_confidence" => Ok(ConfirmationReason::LowConfidence),
            "bracketed_spans_present" => Ok(ConfirmationReason::BracketedSpansPresent),
            "meaning_change_risk_high" => Ok(ConfirmationReason::MeaningChangeRiskHigh),
            "has_diagrams_or_low_quality" => Ok(ConfirmationReason::HasDiagramsOrLowQuality),
            _ => Err(()),
        }
    }
}

// Models sometimes invent reasons; the policy overwrites the field anyway.
impl<'de> Deserialize<'de> for ConfirmationReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .and_then(|s| s.parse().ok())
            .unwrap_or_default())
    }
}

/// Scalar fields the confirmation policy reads and writes.
pub trait ConfirmationScores {
    fn confidence(&self) -> f64;
    fn meaning_change_risk(&self) -> f64;
    fn bracketed_spans_count(&self) -> u32;
    fn needs_rescan(&self) -> bool;
    fn confirmation(&self) -> (bool, ConfirmationReason);
    fn set_confirmation(&mut self, needed: bool, reason: ConfirmationReason);
}

/// Canonical shapes a student's answer can be normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerShape {
    Number,
    String,
    Steps,
    List,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_reason_decodes_as_none() {
        let r: ConfirmationReason = serde_json::from_str("\"blurry\"").unwrap();
        assert_eq!(r, ConfirmationReason::None);
        let r: ConfirmationReason = serde_json::from_str("\"low_confidence\"").unwrap();
        assert_eq!(r, ConfirmationReason::LowConfidence);
        let r: ConfirmationReason = serde_json::from_str("null").unwrap();
        assert_eq!(r, ConfirmationReason::None);
    }

    #[test]
    fn reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ConfirmationReason::HasDiagramsOrLowQuality).unwrap(),
            "\"has_diagrams_or_low_quality\""
        );
    }
}
