use std::time::Duration;

use thiserror::Error;

use crate::types::Operation;

/// Upper bound on the upstream error body kept in a `ProviderError`.
pub const MAX_ERROR_BODY_BYTES: usize = 1024;

/// Error taxonomy shared by every engine, the executor and the HTTP layer.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("engine {engine} does not support {operation}; use one of: {supported}")]
    Unsupported {
        engine: String,
        operation: Operation,
        supported: String,
    },

    #[error("unknown provider {name:?}; available: {available}")]
    UnknownProvider { name: String, available: String },

    #[error("provider error ({engine}): {body}")]
    ProviderError {
        engine: String,
        status: Option<u16>,
        body: String,
    },

    #[error("empty output from {engine}")]
    EmptyOutput { engine: String },

    #[error("bad JSON from {engine}: {message}")]
    BadJson { engine: String, message: String },

    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    #[error("bad schema {name}: {message}")]
    BadSchema { name: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{operation}: {source}")]
    Operation {
        operation: Operation,
        #[source]
        source: Box<LlmError>,
    },
}

impl LlmError {
    /// Build a provider error from an HTTP status and raw body, truncating the body.
    pub fn provider(engine: impl Into<String>, status: Option<u16>, body: &str) -> Self {
        let body = truncate_bytes(body, MAX_ERROR_BODY_BYTES);
        let body = match status {
            Some(code) => format!("status {code}: {body}"),
            None => body,
        };
        LlmError::ProviderError {
            engine: engine.into(),
            status,
            body,
        }
    }

    /// Tag an error with the operation it came from. Already-tagged errors are kept as is.
    pub fn tagged(self, operation: Operation) -> Self {
        match self {
            tagged @ LlmError::Operation { .. } => tagged,
            other => LlmError::Operation {
                operation,
                source: Box::new(other),
            },
        }
    }

    /// The innermost, untagged error.
    pub fn root(&self) -> &LlmError {
        match self {
            LlmError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether a retry of the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.root(), LlmError::ProviderError { .. })
    }
}

impl From<std::io::Error> for LlmError {
    fn from(err: std::io::Error) -> Self {
        LlmError::Internal(err.to_string())
    }
}

/// Cut a string to at most `max` bytes without splitting a UTF-8 sequence.
pub fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Cut a string to at most `max` Unicode code points.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
