use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use lessonkit_prompts::DEFAULT_PROMPT_DIR;
use lessonkit_providers::OpenAiEndpoint;

/// Yandex Cloud credentials. Both values are set or neither.
#[derive(Debug, Clone)]
pub struct YandexCredentials {
    pub oauth_token: String,
    pub folder_id: String,
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address
    pub bind_address: String,
    /// HTTP server port
    pub port: u16,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_endpoint: OpenAiEndpoint,
    pub deepseek_api_key: Option<String>,
    pub deepseek_model: String,
    pub yandex: Option<YandexCredentials>,
    pub yandex_model: String,
    /// Root of the prompt and schema override tree
    pub prompt_dir: PathBuf,
    /// SQLite cache file
    pub cache_db: PathBuf,
    /// Daily-rolling NDJSON logs go here when set
    pub log_dir: Option<PathBuf>,
    /// Log level
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Blank values count as unset.
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let port = match var("PORT") {
            Some(raw) => raw.parse().with_context(|| format!("PORT must be a port number, got {raw:?}"))?,
            None => 8000,
        };
        let openai_endpoint = match var("OPENAI_ENDPOINT") {
            Some(raw) => raw.parse::<OpenAiEndpoint>().map_err(anyhow::Error::msg)?,
            None => OpenAiEndpoint::default(),
        };
        let yandex = match (var("YC_OAUTH_TOKEN"), var("YC_FOLDER_ID")) {
            (Some(oauth_token), Some(folder_id)) => Some(YandexCredentials { oauth_token, folder_id }),
            (None, None) => None,
            _ => bail!("YC_OAUTH_TOKEN and YC_FOLDER_ID must be set together"),
        };

        Ok(Self {
            bind_address: or("BIND_ADDRESS", "0.0.0.0"),
            port,
            gemini_api_key: var("GEMINI_API_KEY"),
            gemini_model: or("GEMINI_MODEL", "gemini-2.5-flash"),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_model: or("OPENAI_MODEL", "gpt-4o-mini"),
            openai_endpoint,
            deepseek_api_key: var("DEEPSEEK_API_KEY"),
            deepseek_model: or("DEEPSEEK_MODEL", "deepseek-chat"),
            yandex,
            yandex_model: or("YANDEX_MODEL", "yandexgpt/latest"),
            prompt_dir: PathBuf::from(or("PROMPT_DIR", DEFAULT_PROMPT_DIR)),
            cache_db: PathBuf::from(or("CACHE_DB", "lessonkit_cache.db")),
            log_dir: var("LOG_DIR").map(PathBuf::from),
            log_level: or("RUST_LOG", "info"),
        })
    }

    /// Keys the server cannot start without.
    pub fn require_engine_keys(&self) -> Result<(&str, &str)> {
        let gemini = self
            .gemini_api_key
            .as_deref()
            .context("GEMINI_API_KEY is required")?;
        let openai = self
            .openai_api_key
            .as_deref()
            .context("OPENAI_API_KEY is required")?;
        Ok((gemini, openai))
    }
}
