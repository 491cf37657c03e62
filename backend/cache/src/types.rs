use chrono::{DateTime, Utc};
use serde::Serialize;

/// One cached parse per `(image_hash, engine, model)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseCacheRow {
    /// Row id assigned by the store; ignored on upsert.
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub chat_id: Option<i64>,
    pub media_group_id: Option<String>,
    pub image_hash: String,
    pub engine: String,
    pub model: String,
    /// Parse result as emitted over HTTP.
    pub parse_json: String,
    pub accepted: bool,
    pub accept_reason: Option<String>,
    pub confirmation_needed: bool,
    pub confidence: f64,
}

impl ParseCacheRow {
    /// A fresh row stamped with the current time.
    pub fn new(
        image_hash: impl Into<String>,
        engine: impl Into<String>,
        model: impl Into<String>,
        parse_json: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            created_at: Utc::now(),
            chat_id: None,
            media_group_id: None,
            image_hash: image_hash.into(),
            engine: engine.into(),
            model: model.into(),
            parse_json: parse_json.into(),
            accepted: false,
            accept_reason: None,
            confirmation_needed: false,
            confidence: 0.0,
        }
    }
}

/// One cached hint per `(image_hash, engine, model, level)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HintCacheRow {
    pub image_hash: String,
    pub engine: String,
    pub model: String,
    /// Hint level 1..=3.
    pub level: u8,
    pub hint_json: String,
    pub created_at: DateTime<Utc>,
}

impl HintCacheRow {
    pub fn new(
        image_hash: impl Into<String>,
        engine: impl Into<String>,
        model: impl Into<String>,
        level: u8,
        hint_json: impl Into<String>,
    ) -> Self {
        Self {
            image_hash: image_hash.into(),
            engine: engine.into(),
            model: model.into(),
            level,
            hint_json: hint_json.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub parse_rows: u64,
    pub accepted_parse_rows: u64,
    pub hint_rows: u64,
}
