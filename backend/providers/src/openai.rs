use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use lessonkit_core::{Engine, LlmError, StructuredCall};
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::extract::{chat_text, finish, parse_envelope, responses_text};
use crate::system_with_schema;
use crate::transport::{read_body, send_error};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Which OpenAI endpoint family to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenAiEndpoint {
    /// `/responses` with strict `json_schema` output.
    #[default]
    Responses,
    /// `/chat/completions` with `json_object` output and the schema inlined.
    Chat,
}

impl FromStr for OpenAiEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "responses" => Ok(Self::Responses),
            "chat" | "chat_completions" => Ok(Self::Chat),
            other => Err(format!("unknown OpenAI endpoint {other:?}; expected responses or chat")),
        }
    }
}

impl fmt::Display for OpenAiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Responses => "responses",
            Self::Chat => "chat",
        })
    }
}

/// OpenAI engine, registered as `gpt`.
pub struct OpenAiEngine {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    endpoint: OpenAiEndpoint,
}

impl OpenAiEngine {
    pub fn new(client: Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            endpoint: OpenAiEndpoint::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: OpenAiEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> OpenAiEndpoint {
        self.endpoint
    }
}

/// gpt-5 family models reject any temperature other than 1.
pub fn effective_temperature(model: &str, requested: f32) -> f32 {
    if model.contains("gpt-5") {
        1.0
    } else {
        requested
    }
}

pub fn responses_body(model: &str, call: &StructuredCall) -> Value {
    let mut user = vec![json!({ "type": "input_text", "text": call.user_message })];
    for image in &call.images {
        user.push(json!({ "type": "input_image", "image_url": image.data_url() }));
    }

    let mut body = json!({
        "model": model,
        "input": [
            { "role": "system", "content": [{ "type": "input_text", "text": call.system_prompt }] },
            { "role": "user", "content": user }
        ],
        "text": {
            "format": {
                "type": "json_schema",
                "name": call.operation.as_str(),
                "strict": true,
                "schema": call.strict_schema.as_ref(),
            }
        },
        "temperature": effective_temperature(model, call.sampling.temperature),
    });
    if let (Some(top_p), Some(map)) = (call.sampling.top_p, body.as_object_mut()) {
        map.insert("top_p".into(), json!(top_p));
    }
    body
}

/// Chat-completions body shared with other OpenAI-compatible engines.
pub fn chat_body(model: &str, call: &StructuredCall) -> Value {
    let user = if call.has_images() {
        let mut parts = vec![json!({ "type": "text", "text": call.user_message })];
        for image in &call.images {
            parts.push(json!({ "type": "image_url", "image_url": { "url": image.data_url() } }));
        }
        Value::Array(parts)
    } else {
        Value::String(call.user_message.clone())
    };

    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert(
        "messages".into(),
        json!([
            { "role": "system", "content": system_with_schema(call) },
            { "role": "user", "content": user }
        ]),
    );
    body.insert("response_format".into(), json!({ "type": "json_object" }));
    body.insert(
        "temperature".into(),
        json!(effective_temperature(model, call.sampling.temperature)),
    );
    let sampling = &call.sampling;
    for (key, value) in [
        ("top_p", sampling.top_p),
        ("presence_penalty", sampling.presence_penalty),
        ("frequency_penalty", sampling.frequency_penalty),
    ] {
        if let Some(v) = value {
            body.insert(key.into(), json!(v));
        }
    }
    Value::Object(body)
}

#[async_trait]
impl Engine for OpenAiEngine {
    fn name(&self) -> &str {
        "gpt"
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
        let (url, body) = match self.endpoint {
            OpenAiEndpoint::Responses => (format!("{}/responses", self.base_url), responses_body(&model, call)),
            OpenAiEndpoint::Chat => (format!("{}/chat/completions", self.base_url), chat_body(&model, call)),
        };

        debug!(
            model = %model,
            endpoint = %self.endpoint,
            operation = %call.operation,
            images = call.images.len(),
            "Sending request to OpenAI"
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(self.name(), e))?;
        let raw = read_body(self.name(), response).await?;
        let envelope = parse_envelope(self.name(), &raw)?;

        let text = match self.endpoint {
            OpenAiEndpoint::Responses => responses_text(&envelope),
            OpenAiEndpoint::Chat => chat_text(&envelope),
        };
        finish(self.name(), text)
    }
}
