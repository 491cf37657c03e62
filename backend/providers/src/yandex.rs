//! YandexGPT engine authenticated with short-lived IAM tokens.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lessonkit_core::{Engine, LlmError, StructuredCall};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::extract::{finish, parse_envelope, yandex_text};
use crate::system_with_schema;
use crate::transport::{read_body, send_error};

pub const IAM_TOKEN_URL: &str = "https://iam.api.cloud.yandex.net/iam/v1/tokens";
pub const YANDEX_LLM_URL: &str = "https://llm.api.cloud.yandex.net/foundationModels/v1/completion";

/// Lifetime assumed when the IAM response carries no usable `expiresAt`.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(11 * 60 * 60);
/// Tokens are refreshed this long before they expire.
pub const TOKEN_REFRESH_SKEW: Duration = Duration::from_secs(60);

const ENGINE: &str = "yandex";

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IamTokenResponse {
    iam_token: String,
    #[serde(default)]
    expires_at: Option<String>,
}

/// Exchanges an OAuth token for IAM tokens and caches the current one.
pub struct IamTokenCache {
    client: Client,
    oauth_token: String,
    url: String,
    current: Mutex<Option<CachedToken>>,
}

impl IamTokenCache {
    pub fn new(client: Client, oauth_token: impl Into<String>) -> Self {
        Self {
            client,
            oauth_token: oauth_token.into(),
            url: IAM_TOKEN_URL.to_string(),
            current: Mutex::new(None),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Seed the cache with a known token. Used by tests and by callers that
    /// already hold a fresh token.
    pub async fn prime(&self, token: impl Into<String>, ttl: Duration) {
        *self.current.lock().await = Some(CachedToken {
            token: token.into(),
            refresh_at: Instant::now() + ttl.saturating_sub(TOKEN_REFRESH_SKEW),
        });
    }

    /// Return a valid token, exchanging a new one when the cached token is
    /// missing or within the refresh window. The lock is held across the
    /// exchange so concurrent callers share one request.
    pub async fn token(&self) -> Result<String, LlmError> {
        let mut current = self.current.lock().await;
        if let Some(cached) = current.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *current = Some(fresh);
        Ok(token)
    }

    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }

    async fn exchange(&self) -> Result<CachedToken, LlmError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "yandexPassportOauthToken": self.oauth_token }))
            .send()
            .await
            .map_err(|e| send_error(ENGINE, e))?;
        let raw = read_body(ENGINE, response).await?;
        let parsed: IamTokenResponse = serde_json::from_str(&raw).map_err(|e| LlmError::BadJson {
            engine: ENGINE.to_string(),
            message: format!("IAM token response: {e}"),
        })?;

        let ttl = token_ttl(parsed.expires_at.as_deref(), Utc::now());
        info!(ttl_secs = ttl.as_secs(), "Obtained Yandex IAM token");
        Ok(CachedToken {
            token: parsed.iam_token,
            refresh_at: Instant::now() + ttl.saturating_sub(TOKEN_REFRESH_SKEW),
        })
    }
}

/// Remaining lifetime of a token given its advertised `expiresAt`.
pub fn token_ttl(expires_at: Option<&str>, now: DateTime<Utc>) -> Duration {
    expires_at
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .and_then(|at| (at.with_timezone(&Utc) - now).to_std().ok())
        .filter(|ttl| !ttl.is_zero())
        .unwrap_or(DEFAULT_TOKEN_TTL)
}

/// YandexGPT foundation-models engine. Text operations only.
pub struct YandexEngine {
    client: Client,
    tokens: IamTokenCache,
    folder_id: String,
    model: String,
    url: String,
}

impl YandexEngine {
    pub fn new(client: Client, tokens: IamTokenCache, folder_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            tokens,
            folder_id: folder_id.into(),
            model: model.into(),
            url: YANDEX_LLM_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn model_uri(&self, model: &str) -> String {
        format!("gpt://{}/{}", self.folder_id, model)
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let token = self.tokens.token().await?;
        self.client
            .post(&self.url)
            .bearer_auth(token)
            .header("x-folder-id", &self.folder_id)
            .json(body)
            .send()
            .await
            .map_err(|e| send_error(ENGINE, e))
    }
}

pub fn completion_body(model_uri: &str, call: &StructuredCall) -> Value {
    json!({
        "modelUri": model_uri,
        "completionOptions": {
            "stream": false,
            "temperature": call.sampling.temperature,
            "maxTokens": "2000",
        },
        "jsonObject": true,
        "messages": [
            { "role": "system", "text": system_with_schema(call) },
            { "role": "user", "text": call.user_message },
        ],
    })
}

#[async_trait]
impl Engine for YandexEngine {
    fn name(&self) -> &str {
        ENGINE
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
        let body = completion_body(&self.model_uri(&model), call);
        debug!(model = %model, operation = %call.operation, "Sending request to YandexGPT");

        let mut response = self.post(&body).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            info!("YandexGPT rejected the IAM token; refreshing once");
            self.tokens.invalidate().await;
            response = self.post(&body).await?;
        }
        let raw = read_body(ENGINE, response).await?;
        let envelope = parse_envelope(ENGINE, &raw)?;
        finish(ENGINE, yandex_text(&envelope))
    }
}
