//! Pulling the model's text out of provider envelopes.

use lessonkit_core::LlmError;
use serde::de::DeserializeOwned;
use serde_json::Value;

const TEXT_PART_TYPES: [&str; 3] = ["output_text", "text", ""];

/// Responses API: `output_text`, else the concatenated text parts of `output`.
pub fn responses_text(envelope: &Value) -> Option<String> {
    if let Some(text) = envelope.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return Some(text.to_string());
        }
    }

    let mut out = String::new();
    for item in envelope.get("output").and_then(Value::as_array)?.iter() {
        let Some(parts) = item.get("content").and_then(Value::as_array) else {
            continue;
        };
        for part in parts {
            let kind = part.get("type").and_then(Value::as_str).unwrap_or("");
            if !TEXT_PART_TYPES.contains(&kind) {
                continue;
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
        }
    }
    Some(out)
}

/// Chat completions: `choices[0].message.content`.
pub fn chat_text(envelope: &Value) -> Option<String> {
    envelope
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Gemini: first text part of the first candidate.
pub fn gemini_text(envelope: &Value) -> Option<String> {
    envelope
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)?
        .iter()
        .find_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

/// YandexGPT: `result.alternatives[0].message.text`.
pub fn yandex_text(envelope: &Value) -> Option<String> {
    envelope
        .pointer("/result/alternatives/0/message/text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Remove a surrounding ```` ```json ... ``` ```` fence, if any, and trim.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_envelope(engine: &str, body: &str) -> Result<Value, LlmError> {
    serde_json::from_str(body).map_err(|e| LlmError::BadJson {
        engine: engine.to_string(),
        message: format!("provider envelope: {e}"),
    })
}

/// Turn extracted text into the final JSON text an engine returns.
pub fn finish(engine: &str, text: Option<String>) -> Result<String, LlmError> {
    let text = text.unwrap_or_default();
    let cleaned = strip_fences(&text);
    if cleaned.is_empty() {
        return Err(LlmError::EmptyOutput { engine: engine.to_string() });
    }
    serde_json::from_str::<Value>(cleaned).map_err(|e| LlmError::BadJson {
        engine: engine.to_string(),
        message: e.to_string(),
    })?;
    Ok(cleaned.to_string())
}

/// Decode an engine's JSON text into a typed result.
pub fn decode_json<T: DeserializeOwned>(engine: &str, text: &str) -> Result<T, LlmError> {
    serde_json::from_str(text).map_err(|e| LlmError::BadJson {
        engine: engine.to_string(),
        message: e.to_string(),
    })
}
