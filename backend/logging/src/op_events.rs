//! Operation Event Log
//!
//! One structured record per finished operation, emitted under the `llm_ops`
//! target so it can be filtered or routed separately.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::redact::redact_sensitive_data;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    Ok,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationEvent {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub version: String,
    pub engine: String,
    pub model: String,
    pub cache_hit: bool,
    pub latency_ms: u64,
    pub outcome: OperationOutcome,
}

impl OperationEvent {
    pub fn new(operation: &str, version: &str, engine: &str, model: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            version: version.to_string(),
            engine: engine.to_string(),
            model: model.to_string(),
            cache_hit: false,
            latency_ms: 0,
            outcome: OperationOutcome::Ok,
        }
    }

    pub fn cache_hit(mut self, hit: bool) -> Self {
        self.cache_hit = hit;
        self
    }

    pub fn latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn failed(mut self, message: &str) -> Self {
        self.outcome = OperationOutcome::Error {
            message: redact_sensitive_data(message),
        };
        self
    }

    /// Emit the event through `tracing`.
    pub fn emit(&self) {
        let record = serde_json::to_string(self).unwrap_or_default();
        match &self.outcome {
            OperationOutcome::Ok => info!(
                target: "llm_ops",
                operation = %self.operation,
                version = %self.version,
                engine = %self.engine,
                model = %self.model,
                cache_hit = self.cache_hit,
                latency_ms = self.latency_ms,
                event = %record,
                "Operation completed"
            ),
            OperationOutcome::Error { message } => warn!(
                target: "llm_ops",
                operation = %self.operation,
                version = %self.version,
                engine = %self.engine,
                model = %self.model,
                latency_ms = self.latency_ms,
                error = %message,
                event = %record,
                "Operation failed"
            ),
        }
    }
}
