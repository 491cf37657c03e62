//! Projection of raw CHECK output onto the v1.2 result shape.

use lessonkit_core::contracts::v1::{CheckBranch, CheckIssue, CheckResult, CheckSafety, Verdict};
use lessonkit_core::truncate_chars;
use serde_json::Value;

use super::limits::clamp_unit;

pub const CHECK_SCHEMA_VERSION: &str = "1.2";

const MAX_ISSUES: usize = 3;
const MAX_REASON_CHARS: usize = 180;
const MAX_FIX_SUGGESTIONS: usize = 2;
const MAX_FIX_CHARS: usize = 240;
const MAX_SPEAKABLE_CHARS: usize = 140;

/// Build a v1.2 result from whatever the engine returned. Unknown properties
/// are dropped, enums fall back to their defaults and every bound is applied.
/// `branch` is used when the output names no known branch.
pub fn normalize_check_v12(raw: &Value, branch: Option<CheckBranch>) -> CheckResult {
    let branch = enum_field::<CheckBranch>(raw.get("branch"))
        .or(branch)
        .unwrap_or_default();
    let verdict = enum_field::<Verdict>(raw.get("verdict")).unwrap_or_default();

    let issues = raw
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(issue).take(MAX_ISSUES).collect())
        .unwrap_or_default();

    let speakable_message = raw
        .get("speakable_message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| truncate_chars(s, MAX_SPEAKABLE_CHARS));

    let safety = raw.get("safety");
    CheckResult {
        version: CHECK_SCHEMA_VERSION.to_string(),
        branch,
        verdict,
        confidence: clamp_unit(number(raw.get("confidence")).unwrap_or(0.0)),
        issues,
        speakable_message,
        safety: CheckSafety {
            pii_removed: flag(safety.and_then(|s| s.get("pii_removed"))),
            banned_content: flag(safety.and_then(|s| s.get("banned_content"))),
        },
    }
}

fn enum_field<T: serde::de::DeserializeOwned>(value: Option<&Value>) -> Option<T> {
    let text = value?.as_str()?.trim().to_ascii_lowercase();
    serde_json::from_value(Value::String(text)).ok()
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn flag(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(false)
}

fn issue(value: &Value) -> Option<CheckIssue> {
    let (code, reason, fixes) = match value {
        Value::String(reason) => (None, reason.as_str(), None),
        Value::Object(map) => (
            map.get("code").and_then(Value::as_str).map(str::to_string),
            map.get("reason").and_then(Value::as_str).unwrap_or(""),
            map.get("fix_suggestions").and_then(Value::as_array),
        ),
        _ => return None,
    };
    let reason = reason.trim();
    if reason.is_empty() {
        return None;
    }
    let fix_suggestions = fixes
        .map(|fixes| {
            fixes
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .take(MAX_FIX_SUGGESTIONS)
                .map(|s| truncate_chars(s, MAX_FIX_CHARS))
                .collect()
        })
        .unwrap_or_default();
    Some(CheckIssue {
        code,
        reason: truncate_chars(reason, MAX_REASON_CHARS),
        fix_suggestions,
    })
}
