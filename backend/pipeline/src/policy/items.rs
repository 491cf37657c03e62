//! Consistency between each v2 item's final answer and its last solution step.

use lessonkit_core::contracts::v2::{ParseItem, ParseResponse};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const NUM: &str = r"-?\d+(?:[.,]\d+)?";

static TRAILING_EQUALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"=\s*({NUM})\s*$")).expect("valid regex"));
static ANSWER_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)ответ[:\s]+(.+?)\s*(?:\.(?:\s|$)|$)").expect("valid regex")
});
static DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+").expect("valid regex"));
static TOTAL_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)итого\s*:?\s*({NUM})")).expect("valid regex"));

pub const MISMATCH_NOTE: &str = "final_answer does not match the last solution step";

/// Flag items whose `final_answer` disagrees with the answer written in the
/// last solution step. Items without either side are left alone.
pub fn validate_parse_items(response: &mut ParseResponse) {
    for item in &mut response.items {
        validate_item(item);
    }
}

fn validate_item(item: &mut ParseItem) {
    let Some(expected) = item.solution_internal.final_answer.as_ref().and_then(answer_text) else {
        return;
    };
    let Some(step) = item.solution_internal.solution_steps.last() else {
        return;
    };
    let Some(found) = extract_step_answer(step) else {
        return;
    };
    if normalize_answer(&expected) != normalize_answer(&found) {
        let quality = &mut item.item_quality;
        quality.unsafe_to_finalize_answer = true;
        if !quality.notes.iter().any(|n| n == MISMATCH_NOTE) {
            quality.notes.push(MISMATCH_NOTE.to_string());
        }
    }
}

fn answer_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The answer written in a solution step: `= <num>` at the end of the line,
/// `ответ: <value>` up to a full stop, or `итого <num>`.
pub fn extract_step_answer(step: &str) -> Option<String> {
    let last_line = step.trim_end().lines().last().unwrap_or("");
    if let Some(caps) = TRAILING_EQUALS.captures(last_line.trim_end_matches('.').trim_end()) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = ANSWER_WORD.captures_iter(step).last() {
        return Some(caps[1].to_string());
    }
    TOTAL_WORD
        .captures_iter(step)
        .last()
        .map(|caps| caps[1].to_string())
}

/// Lowercase, drop whitespace, use `.` as the decimal separator, strip
/// trailing decimal zeros and stray dots.
pub fn normalize_answer(value: &str) -> String {
    let s: String = value
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let s = DECIMAL.replace_all(&s, |caps: &regex::Captures<'_>| {
        caps[0].trim_end_matches('0').trim_end_matches('.').to_string()
    });
    s.trim_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lessonkit_core::contracts::v2::{ItemQuality, SolutionInternal};
    use serde_json::json;

    fn item(steps: &[&str], final_answer: Value) -> ParseItem {
        ParseItem {
            item_id: "1".into(),
            solution_internal: SolutionInternal {
                method_tag: None,
                solution_steps: steps.iter().map(|s| s.to_string()).collect(),
                final_answer: Some(final_answer),
            },
            item_quality: ItemQuality {
                confidence: 0.9,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn extracts_answers_in_all_forms() {
        assert_eq!(extract_step_answer("25 · 4 = 100").as_deref(), Some("100"));
        assert_eq!(extract_step_answer("12 : 5 = 2,4.").as_deref(), Some("2,4"));
        assert_eq!(extract_step_answer("Ответ: 25 см.").as_deref(), Some("25 см"));
        assert_eq!(extract_step_answer("ответ 7 яблок").as_deref(), Some("7 яблок"));
        assert_eq!(extract_step_answer("Итого 15 рублей").as_deref(), Some("15"));
        assert_eq!(extract_step_answer("Сложим числа"), None);
    }

    #[test]
    fn normalization_matches_equivalent_forms() {
        assert_eq!(normalize_answer(" 2,50 "), "2.5");
        assert_eq!(normalize_answer("10.0"), "10");
        assert_eq!(normalize_answer("100"), "100");
        assert_eq!(normalize_answer("25 См"), "25см");
        assert_eq!(normalize_answer("9."), "9");
        assert_eq!(normalize_answer("2.50 кг"), "2.5кг");
    }

    #[test]
    fn mismatch_marks_item_unsafe() {
        let mut response = ParseResponse {
            items: vec![
                item(&["5 + 4 = 9"], json!(9)),
                item(&["12 - 5 = 7"], json!("8")),
                item(&["Ответ: 2,5 кг."], json!("2.50 кг")),
            ],
            ..Default::default()
        };
        validate_parse_items(&mut response);
        assert!(!response.items[0].item_quality.unsafe_to_finalize_answer);
        assert!(response.items[1].item_quality.unsafe_to_finalize_answer);
        assert!(!response.items[2].item_quality.unsafe_to_finalize_answer);

        let once = response.clone();
        validate_parse_items(&mut response);
        assert_eq!(once, response);
        assert_eq!(response.items[1].item_quality.notes, vec![MISMATCH_NOTE.to_string()]);
    }

    #[test]
    fn missing_sides_are_not_judged() {
        let mut no_answer = item(&["5 + 4 = 9"], Value::Null);
        no_answer.solution_internal.final_answer = None;
        let no_number = item(&["Сравним величины"], json!(3));
        let mut response = ParseResponse {
            items: vec![no_answer.clone(), no_number.clone()],
            ..Default::default()
        };
        validate_parse_items(&mut response);
        assert_eq!(response.items, vec![no_answer, no_number]);
    }

    #[test]
    fn unsafe_flag_is_never_cleared() {
        let mut flagged = item(&["5 + 4 = 9"], json!(9));
        flagged.item_quality.unsafe_to_finalize_answer = true;
        let mut response = ParseResponse {
            items: vec![flagged],
            ..Default::default()
        };
        validate_parse_items(&mut response);
        assert!(response.items[0].item_quality.unsafe_to_finalize_answer);
    }
}
