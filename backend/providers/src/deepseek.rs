use async_trait::async_trait;
use lessonkit_core::{Engine, LlmError, StructuredCall};
use reqwest::Client;
use tracing::debug;

use crate::extract::{chat_text, finish, parse_envelope};
use crate::openai::chat_body;
use crate::transport::{read_body, send_error};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// DeepSeek over its OpenAI-compatible chat API. Text operations only.
pub struct DeepSeekEngine {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl DeepSeekEngine {
    pub fn new(client: Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEEPSEEK_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Engine for DeepSeekEngine {
    fn name(&self) -> &str {
        "deepseek"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_vision(&self) -> bool {
        false
    }

    async fn complete(&self, call: &StructuredCall) -> Result<String, LlmError> {
        self.ensure_supported(call)?;
        let model = self.model_for(call);
        debug!(model = %model, operation = %call.operation, "Sending request to DeepSeek");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&chat_body(&model, call))
            .send()
            .await
            .map_err(|e| send_error(self.name(), e))?;
        let raw = read_body(self.name(), response).await?;
        let envelope = parse_envelope(self.name(), &raw)?;
        finish(self.name(), chat_text(&envelope))
    }
}
