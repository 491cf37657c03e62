//! Legacy fields that models emit either as a bare string or as an object.
//!
//! The string form is tried first; the original string is kept in a side field
//! that is never serialized, so re-encoding always produces the object form.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiniCheckKind {
    #[default]
    Yn,
    SingleWord,
    Choice,
}

/// A short comprehension check attached to an analogue task.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MiniCheckItem {
    #[serde(rename = "type")]
    pub kind: MiniCheckKind,
    pub question: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_form: Option<String>,
    #[serde(skip)]
    pub raw: Option<String>,
}

#[derive(Deserialize)]
struct MiniCheckObject {
    #[serde(rename = "type", default, deserialize_with = "super::lenient::opt")]
    kind: Option<MiniCheckKind>,
    #[serde(default)]
    question: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    expected_form: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MiniCheckRepr {
    Text(String),
    Object(MiniCheckObject),
}

impl<'de> Deserialize<'de> for MiniCheckItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match MiniCheckRepr::deserialize(deserializer)? {
            MiniCheckRepr::Text(text) => MiniCheckItem {
                kind: MiniCheckKind::Yn,
                question: text.trim().to_string(),
                options: Vec::new(),
                expected_form: None,
                raw: Some(text),
            },
            MiniCheckRepr::Object(obj) => MiniCheckItem {
                kind: obj.kind.unwrap_or_else(|| {
                    if obj.options.is_empty() {
                        MiniCheckKind::Yn
                    } else {
                        MiniCheckKind::Choice
                    }
                }),
                question: obj.question,
                options: obj.options,
                expected_form: obj.expected_form,
                raw: None,
            },
        })
    }
}

/// A typical mistake the hint warns about.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MistakeItem {
    pub mistake: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub why: Option<String>,
    #[serde(skip)]
    pub raw: Option<String>,
}

#[derive(Deserialize)]
struct MistakeObject {
    #[serde(default, alias = "text")]
    mistake: String,
    #[serde(default, alias = "reason")]
    why: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MistakeRepr {
    Text(String),
    Object(MistakeObject),
}

impl<'de> Deserialize<'de> for MistakeItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match MistakeRepr::deserialize(deserializer)? {
            MistakeRepr::Text(text) => MistakeItem {
                mistake: text.trim().to_string(),
                why: None,
                raw: Some(text),
            },
            MistakeRepr::Object(obj) => MistakeItem {
                mistake: obj.mistake,
                why: obj.why,
                raw: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mini_check_from_string_keeps_raw() {
        let item: MiniCheckItem = serde_json::from_value(json!(" Is 7 more than 5? ")).unwrap();
        assert_eq!(item.question, "Is 7 more than 5?");
        assert_eq!(item.raw.as_deref(), Some(" Is 7 more than 5? "));
        let out = serde_json::to_value(&item).unwrap();
        assert_eq!(out, json!({"type": "yn", "question": "Is 7 more than 5?"}));
    }

    #[test]
    fn mini_check_from_object() {
        let item: MiniCheckItem = serde_json::from_value(json!({
            "type": "choice",
            "question": "Which is bigger?",
            "options": ["12", "21"],
            "unknown": 1
        }))
        .unwrap();
        assert_eq!(item.kind, MiniCheckKind::Choice);
        assert_eq!(item.options.len(), 2);
        assert!(item.raw.is_none());
    }

    #[test]
    fn mini_check_infers_kind_when_missing_or_invalid() {
        let item: MiniCheckItem =
            serde_json::from_value(json!({"type": "essay", "question": "q", "options": ["a", "b"]})).unwrap();
        assert_eq!(item.kind, MiniCheckKind::Choice);
    }

    #[test]
    fn mistake_item_both_forms() {
        let a: MistakeItem = serde_json::from_value(json!("forgot to carry")).unwrap();
        assert_eq!(a.mistake, "forgot to carry");
        assert!(a.raw.is_some());
        let b: MistakeItem =
            serde_json::from_value(json!({"mistake": "adds instead of subtracts", "why": "reads 'less' as plus"})).unwrap();
        assert_eq!(b.why.as_deref(), Some("reads 'less' as plus"));
        assert!(b.raw.is_none());
    }
}
