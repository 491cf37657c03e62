//! v2 operation contracts. PARSE returns per-item internal solutions, HINT
//! carries a self-check block, OCR is new.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::lenient;
use super::{default_locale, AnswerShape, ConfirmationReason, ConfirmationScores};
use crate::types::{HintLevel, TerminologyLevel};

// ---------------------------------------------------------------------------
// PARSE
// ---------------------------------------------------------------------------

pub use super::v1::{ParseInput, ParseOptions};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseResponse {
    pub raw_text: String,
    pub question: String,
    pub subject: String,
    #[serde(deserialize_with = "lenient::opt")]
    pub grade: Option<u8>,
    pub items: Vec<ParseItem>,
    #[serde(deserialize_with = "lenient::number")]
    pub confidence: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub meaning_change_risk: f64,
    #[serde(deserialize_with = "lenient::count")]
    pub bracketed_spans_count: u32,
    pub needs_rescan: bool,
    pub rescan_reason: Option<String>,
    pub confirmation_needed: bool,
    pub confirmation_reason: ConfirmationReason,
}

impl ConfirmationScores for ParseResponse {
    fn confidence(&self) -> f64 {
        self.confidence
    }
    fn meaning_change_risk(&self) -> f64 {
        self.meaning_change_risk
    }
    fn bracketed_spans_count(&self) -> u32 {
        self.bracketed_spans_count
    }
    fn needs_rescan(&self) -> bool {
        self.needs_rescan
    }
    fn confirmation(&self) -> (bool, ConfirmationReason) {
        (self.confirmation_needed, self.confirmation_reason)
    }
    fn set_confirmation(&mut self, needed: bool, reason: ConfirmationReason) {
        self.confirmation_needed = needed;
        self.confirmation_reason = reason;
    }
}

/// One sub-task of the selected exercise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseItem {
    pub item_id: String,
    pub raw_text: String,
    pub question: String,
    #[serde(deserialize_with = "lenient::opt")]
    pub solution_shape: Option<AnswerShape>,
    pub units: Option<String>,
    pub solution_internal: SolutionInternal,
    pub item_quality: ItemQuality,
}

/// Worked solution kept server-side for CHECK; never shown to the student.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolutionInternal {
    pub method_tag: Option<String>,
    pub solution_steps: Vec<String>,
    /// Number or string as emitted by the model.
    pub final_answer: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemQuality {
    #[serde(deserialize_with = "lenient::number")]
    pub confidence: f64,
    pub unsafe_to_finalize_answer: bool,
    pub notes: Vec<String>,
}

// ---------------------------------------------------------------------------
// HINT
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintInput {
    pub level: HintLevel,
    pub raw_text: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub grade: Option<u8>,
    #[serde(default)]
    pub solution_shape: Option<AnswerShape>,
    #[serde(default)]
    pub terminology_level: Option<TerminologyLevel>,
    #[serde(default)]
    pub previous_hints: Vec<String>,
    /// Method tag from the v2 parse item, if known.
    #[serde(default)]
    pub method_tag: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub image_hash: Option<String>,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HintResult {
    #[serde(deserialize_with = "lenient::hint_level")]
    pub level: Option<HintLevel>,
    #[serde(deserialize_with = "lenient::opt")]
    pub terminology_level: Option<TerminologyLevel>,
    pub hint_title: String,
    pub hint_text: String,
    pub hint_steps: Vec<String>,
    pub control_question: Option<String>,
    /// Fragment of the task text the hint draws attention to.
    pub focus_span: Option<String>,
    pub self_check: Vec<String>,
    pub no_final_answer: bool,
}

// ---------------------------------------------------------------------------
// OCR
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrInput {
    pub image_b64: String,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrResult {
    pub raw_answer_text: String,
    #[serde(deserialize_with = "lenient::number")]
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_item_accepts_numeric_or_text_final_answer() {
        let resp: ParseResponse = serde_json::from_value(json!({
            "items": [
                {"item_id": "a", "solution_internal": {"solution_steps": ["5+4=9"], "final_answer": 9}},
                {"item_id": "b", "solution_internal": {"final_answer": "9 cm"}}
            ],
            "confidence": 0.9
        }))
        .unwrap();
        assert_eq!(resp.items.len(), 2);
        assert_eq!(resp.items[0].solution_internal.final_answer, Some(json!(9)));
        assert!(!resp.items[1].item_quality.unsafe_to_finalize_answer);
    }

    #[test]
    fn ocr_result_defaults() {
        let r: OcrResult = serde_json::from_value(json!({"raw_answer_text": "42"})).unwrap();
        assert_eq!(r.raw_answer_text, "42");
        assert_eq!(r.confidence, 0.0);
    }
}
