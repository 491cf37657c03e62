use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::LlmError;
use crate::image::ImageBlob;
use crate::types::{ApiVersion, EngineDescriptor, Operation, Sampling};

/// Engines that can read page images.
pub const VISION_ENGINES: &str = "gemini, gpt";

/// Everything an engine needs to produce one schema-conformant JSON document.
#[derive(Debug, Clone)]
pub struct StructuredCall {
    pub operation: Operation,
    pub version: ApiVersion,
    /// Operation system prompt.
    pub system_prompt: String,
    /// User turn: optional user prompt text followed by the `{task, input}` JSON blob.
    pub user_message: String,
    pub images: Vec<ImageBlob>,
    /// Schema as loaded, used where the schema is inlined as text.
    pub schema: Arc<Value>,
    /// Strictified schema, used by strict structured-output modes.
    pub strict_schema: Arc<Value>,
    pub sampling: Sampling,
    /// Per-call model override.
    pub model: Option<String>,
}

impl StructuredCall {
    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

/// A language-model backend that answers structured calls with JSON text.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Engine name (e.g., "gemini", "gpt").
    fn name(&self) -> &str;

    /// Default model used when a call has no override.
    fn model(&self) -> &str;

    /// Whether the engine accepts image parts.
    fn supports_vision(&self) -> bool;

    /// Run the call and return the model's JSON text, code fences already stripped.
    async fn complete(&self, call: &StructuredCall) -> Result<String, LlmError>;

    fn descriptor(&self) -> EngineDescriptor {
        EngineDescriptor {
            name: self.name().to_string(),
            model: self.model().to_string(),
            vision: self.supports_vision(),
        }
    }

    /// The override when it is non-blank, else the configured model.
    fn resolve_model(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.model())
            .to_string()
    }

    /// Model the call will actually run on.
    fn model_for(&self, call: &StructuredCall) -> String {
        self.resolve_model(call.model.as_deref())
    }

    /// Reject image calls on engines without vision.
    fn ensure_supported(&self, call: &StructuredCall) -> Result<(), LlmError> {
        if call.has_images() && !self.supports_vision() {
            return Err(LlmError::Unsupported {
                engine: self.name().to_string(),
                operation: call.operation,
                supported: VISION_ENGINES.to_string(),
            });
        }
        Ok(())
    }
}
