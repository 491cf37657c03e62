//! v1 operation contracts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::lenient;
use super::{default_locale, AnswerShape, ConfirmationReason, ConfirmationScores, MiniCheckItem, MistakeItem};
use crate::types::{HintLevel, TerminologyLevel};

// ---------------------------------------------------------------------------
// DETECT
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectInput {
    pub image_b64: String,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub grade_hint: Option<u8>,
}

/// Verbatim pre-screen of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectResult {
    /// `ok`, `needs_rescan` or `not_a_task`.
    pub final_state: String,
    #[serde(deserialize_with = "lenient::number")]
    pub confidence: f64,
    pub needs_rescan: bool,
    pub rescan_reason: Option<String>,
    pub subject_hint: Option<String>,
    #[serde(deserialize_with = "lenient::opt")]
    pub grade_hint: Option<u8>,
    pub has_diagrams: bool,
    pub blocks: Vec<DetectBlock>,
    pub items_raw: Vec<DetectItem>,
    pub tasks: Vec<DetectedTask>,
    /// Set by the executor: every block equals the concatenation of its items.
    pub verbatim_consistent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectBlock {
    pub group_id: String,
    pub block_raw: String,
    /// `plain`, `table` or `columns`.
    pub layout_kind: String,
    pub layout_raw: Option<String>,
    pub semantic_raw: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectItem {
    pub group_id: String,
    pub label: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectedTask {
    pub index: u32,
    pub number_label: Option<String>,
    pub brief: String,
    pub group_id: Option<String>,
    pub subject_hint: Option<String>,
    pub has_diagram: bool,
}

// ---------------------------------------------------------------------------
// PARSE
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseInput {
    pub image_b64: String,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub options: ParseOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    pub grade_hint: Option<u8>,
    pub subject_hint: Option<String>,
    pub selected_task_index: Option<u32>,
    pub selected_task_brief: Option<String>,
    /// Model override for this call.
    pub model: Option<String>,
    pub chat_id: Option<i64>,
    pub media_group_id: Option<String>,
    /// Skip the cache read; the result is still stored.
    pub skip_cache: bool,
}

/// Rewrite of the selected task plus the scores the confirmation policy reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseResult {
    pub raw_text: String,
    pub question: String,
    pub subject: String,
    pub task_type: String,
    #[serde(deserialize_with = "lenient::opt")]
    pub grade: Option<u8>,
    #[serde(deserialize_with = "lenient::opt")]
    pub solution_shape: Option<AnswerShape>,
    pub units: Option<String>,
    pub visual_facts: Vec<String>,
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

impl ConfirmationScores for ParseResult {
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

/// User reply to a parse that asked for confirmation. No correction means "yes".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmParseInput {
    pub image_hash: String,
    /// Model the parse ran on; defaults to the engine's model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub correction: Option<ParseCorrection>,
}

/// Fields the user may fix in a parsed task. Missing fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseCorrection {
    pub raw_text: Option<String>,
    pub question: Option<String>,
    pub subject: Option<String>,
    pub task_type: Option<String>,
    pub grade: Option<u8>,
    pub solution_shape: Option<AnswerShape>,
    pub units: Option<String>,
}

impl ParseCorrection {
    /// Overwrite the parse with the corrected fields. A user-checked text
    /// carries no recognition risk.
    pub fn apply_to(&self, parse: &mut ParseResult) {
        if let Some(v) = &self.raw_text {
            parse.raw_text = v.clone();
        }
        if let Some(v) = &self.question {
            parse.question = v.clone();
        }
        if let Some(v) = &self.subject {
            parse.subject = v.clone();
        }
        if let Some(v) = &self.task_type {
            parse.task_type = v.clone();
        }
        if self.grade.is_some() {
            parse.grade = self.grade;
        }
        if self.solution_shape.is_some() {
            parse.solution_shape = self.solution_shape;
        }
        if self.units.is_some() {
            parse.units = self.units.clone();
        }
        parse.confidence = 1.0;
        parse.meaning_change_risk = 0.0;
        parse.bracketed_spans_count = 0;
        parse.needs_rescan = false;
        parse.rescan_reason = None;
    }
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
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Hash of the page the task came from; enables the hint cache.
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
    pub hint_title: String,
    pub hint_text: String,
    pub hint_steps: Vec<String>,
    pub control_question: Option<String>,
    pub rule_hint: Option<String>,
    pub common_mistakes: Vec<MistakeItem>,
    #[serde(deserialize_with = "lenient::opt")]
    pub terminology_level: Option<TerminologyLevel>,
    pub no_final_answer: bool,
}

// ---------------------------------------------------------------------------
// NORMALIZE
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeInput {
    /// Task structure from PARSE (raw_text, question, units...).
    #[serde(default)]
    pub task: Value,
    pub answer: StudentAnswer,
    pub expected_shape: AnswerShape,
    #[serde(default)]
    pub grade: Option<u8>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
}

/// A student's answer, typed or photographed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentAnswer {
    pub text: Option<String>,
    pub photo_b64: Option<String>,
    pub photo_mime: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeResult {
    pub success: bool,
    #[serde(deserialize_with = "lenient::opt")]
    pub shape: Option<AnswerShape>,
    pub value: Value,
    /// Literal numeric form: `fraction`, `mixed`, `ratio`, `range`, `approx`, `inequality`.
    pub number_kind: Option<String>,
    pub units: Option<String>,
    pub uncertain_reasons: Vec<String>,
    pub needs_clarification: bool,
    pub needs_user_action_message: Option<String>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// CHECK (schema version 1.2)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInput {
    #[serde(default)]
    pub branch: Option<CheckBranch>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub grade: Option<u8>,
    pub student_normalized: Value,
    pub expected_solution: Value,
    #[serde(default)]
    pub hidden_correct_value: Option<Value>,
    #[serde(default = "default_locale")]
    pub locale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckBranch {
    MathBranch,
    RuBranch,
    #[default]
    GenericBranch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    #[default]
    NeedsMoreInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub version: String,
    pub branch: CheckBranch,
    pub verdict: Verdict,
    pub confidence: f64,
    pub issues: Vec<CheckIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speakable_message: Option<String>,
    pub safety: CheckSafety,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckIssue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub fix_suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSafety {
    pub pii_removed: bool,
    pub banned_content: bool,
}

// ---------------------------------------------------------------------------
// ANALOGUE
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalogueInput {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub grade: Option<u8>,
    pub method_tag: String,
    pub original_task_essence: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogueResult {
    pub analogy: AnalogyItem,
    pub leak_guard_passed: bool,
    pub safety: AnalogueSafety,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogyItem {
    pub title: Option<String>,
    pub task_text: String,
    pub solution_steps: Vec<String>,
    pub transfer_bridge: String,
    pub mini_checks: Vec<MiniCheckItem>,
    /// `medium` or `high` preferred.
    pub distance_from_original_hint: Option<String>,
    pub difficulty_note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogueSafety {
    pub no_original_answer_leak: bool,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_result_tolerates_unknown_and_missing_fields() {
        let parsed: ParseResult = serde_json::from_value(json!({
            "raw_text": "2+2=?",
            "question": "2+2=?",
            "confidence": 0.92,
            "meaning_change_risk": 0.05,
            "bracketed_spans_count": 0,
            "needs_rescan": false,
            "solution_shape": "number",
            "something_new": {"nested": true}
        }))
        .unwrap();
        assert_eq!(parsed.raw_text, "2+2=?");
        assert_eq!(parsed.solution_shape, Some(AnswerShape::Number));
        assert_eq!(parsed.confirmation_reason, ConfirmationReason::None);
        assert!(parsed.visual_facts.is_empty());
    }

    #[test]
    fn hint_input_defaults_locale() {
        let input: HintInput = serde_json::from_value(json!({
            "level": "L2",
            "raw_text": "Reshi zadachu"
        }))
        .unwrap();
        assert_eq!(input.level, HintLevel::L2);
        assert_eq!(input.locale, "ru");
        assert!(input.previous_hints.is_empty());
    }

    #[test]
    fn hint_result_accepts_numeric_level() {
        let hint: HintResult = serde_json::from_value(json!({
            "level": 3,
            "hint_title": "Method",
            "common_mistakes": ["off by one", {"mistake": "wrong sign"}]
        }))
        .unwrap();
        assert_eq!(hint.level, Some(HintLevel::L3));
        assert_eq!(hint.common_mistakes.len(), 2);
    }

    #[test]
    fn correction_overwrites_fields_and_clears_risk() {
        let mut parse = ParseResult {
            raw_text: "5 + [?] = 9".into(),
            question: "?".into(),
            confidence: 0.4,
            meaning_change_risk: 0.5,
            bracketed_spans_count: 1,
            needs_rescan: true,
            ..Default::default()
        };
        let input: ConfirmParseInput = serde_json::from_value(json!({
            "image_hash": "ab",
            "correction": {"raw_text": "5 + 4 = 9", "grade": 2}
        }))
        .unwrap();
        input.correction.unwrap().apply_to(&mut parse);
        assert_eq!(parse.raw_text, "5 + 4 = 9");
        assert_eq!(parse.question, "?");
        assert_eq!(parse.grade, Some(2));
        assert_eq!(parse.confidence, 1.0);
        assert_eq!(parse.bracketed_spans_count, 0);
        assert!(!parse.needs_rescan);
    }

    #[test]
    fn check_result_serializes_snake_case_enums() {
        let result = CheckResult {
            version: "1.2".into(),
            branch: CheckBranch::RuBranch,
            verdict: Verdict::NeedsMoreInfo,
            ..Default::default()
        };
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["branch"], "ru_branch");
        assert_eq!(v["verdict"], "needs_more_info");
        assert_eq!(v["safety"], json!({"pii_removed": false, "banned_content": false}));
        assert!(v.get("speakable_message").is_none());
    }
}
