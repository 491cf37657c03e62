use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lessonkit_core::{ApiVersion, Engine, LlmError, Operation, Sampling, StructuredCall};
use serde_json::json;

/// Scripted engine: replies come from a queue, falling back to a fixed reply.
/// Every call is recorded for inspection.
pub struct MockEngine {
    name: String,
    model: String,
    vision: bool,
    fixed_response: Option<String>,
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<StructuredCall>>,
}

impl MockEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: "mock-model".to_string(),
            vision: true,
            fixed_response: None,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn without_vision(mut self) -> Self {
        self.vision = false;
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.fixed_response = Some(response.into());
        self
    }

    /// Queue one reply ahead of the fixed response.
    pub fn push(&self, reply: Result<String, LlmError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
    }

    pub fn calls(&self) -> Vec<StructuredCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }

    async fn complete(&self, call: &StructuredCall) -> Result<String, LlmError> {
        self.ensure_supported(call)?;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.clone());
        }
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(reply) => reply,
            None => self
                .fixed_response
                .clone()
                .ok_or_else(|| LlmError::EmptyOutput { engine: self.name.clone() }),
        }
    }
}

/// A small structured call for adapter tests.
pub fn test_call(operation: Operation, version: ApiVersion) -> StructuredCall {
    let schema = json!({
        "type": "object",
        "properties": { "answer": { "type": "string" } },
        "required": ["answer"]
    });
    StructuredCall {
        operation,
        version,
        system_prompt: format!("You handle {operation} requests.\n"),
        user_message: json!({ "task": operation.as_str(), "input": {} }).to_string(),
        images: Vec::new(),
        schema: Arc::new(schema.clone()),
        strict_schema: Arc::new(schema),
        sampling: Sampling::deterministic(),
        model: None,
    }
}
