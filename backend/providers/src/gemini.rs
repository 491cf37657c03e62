use async_trait::async_trait;
use lessonkit_core::{Engine, LlmError, StructuredCall};
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::extract::{finish, gemini_text, parse_envelope};
use crate::retry::RetryPolicy;
use crate::system_with_schema;
use crate::transport::{read_body, send_error};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini engine over `generateContent`.
pub struct GeminiEngine {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiEngine {
    pub fn new(client: Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn generate_once(&self, model: &str, body: &Value) -> Result<String, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| send_error(self.name(), e))?;
        let raw = read_body(self.name(), response).await?;
        let envelope = parse_envelope(self.name(), &raw)?;
        finish(self.name(), gemini_text(&envelope))
    }
}

pub fn generate_body(call: &StructuredCall) -> Value {
    let mut parts = vec![json!({ "text": call.user_message })];
    for image in &call.images {
        parts.push(json!({
            "inlineData": { "mimeType": image.mime, "data": image.base64() }
        }));
    }

    let mut config = Map::new();
    config.insert("temperature".into(), json!(call.sampling.temperature));
    config.insert("responseMimeType".into(), json!("application/json"));
    let sampling = &call.sampling;
    for (key, value) in [
        ("topP", sampling.top_p),
        ("presencePenalty", sampling.presence_penalty),
        ("frequencyPenalty", sampling.frequency_penalty),
    ] {
        if let Some(v) = value {
            config.insert(key.into(), json!(v));
        }
    }

    json!({
        "systemInstruction": { "parts": [{ "text": system_with_schema(call) }] },
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": Value::Object(config),
    })
}

#[async_trait]
impl Engine for GeminiEngine {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_vision(&self) -> bool {
        true
    }

    async fn complete(&self, call: &StructuredCall) -> Result<String, LlmError> {
        self.ensure_supported(call)?;
        let model = self.model_for(call);
        let body = generate_body(call);
        debug!(
            model = %model,
            operation = %call.operation,
            images = call.images.len(),
            "Sending request to Gemini"
        );
        let (model, body) = (model.as_str(), &body);
        self.retry
            .run(self.name(), move || self.generate_once(model, body))
            .await
    }
}
