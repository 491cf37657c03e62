//! Prompt lookup with provider-specific and shared on-disk overrides, and the
//! atomic prompt write path.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<provider>/prompt/<file>        provider-specific, v1
//! <root>/<provider>/prompt/v2/<file>     provider-specific, v2
//! <root>/prompt/v1/<file>                shared, v1
//! <root>/prompt/v2/<file>                shared, v2
//! ```
//!
//! Files are `<op>.txt` (system), `<op>.user.txt` (user) and `<op>.schema.json`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use lessonkit_core::{ApiVersion, LlmError, Operation};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::embedded;

pub const DEFAULT_PROMPT_DIR: &str = "api/internal/ocr";

/// Largest prompt accepted by [`PromptRegistry::store`].
pub const MAX_PROMPT_BYTES: usize = 2 * 1024 * 1024;

static PROMPT_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));
static PROVIDER_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_-]+$").expect("valid regex"));

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    System,
    User,
    Schema,
}

impl PromptKind {
    fn file_name(&self, op: Operation) -> String {
        match self {
            PromptKind::System => format!("{}.txt", op.as_str()),
            PromptKind::User => format!("{}.user.txt", op.as_str()),
            PromptKind::Schema => format!("{}.schema.json", op.as_str()),
        }
    }

    fn embedded(&self, op: Operation, version: ApiVersion) -> Option<&'static str> {
        match self {
            PromptKind::System => embedded::system_prompt(op, version),
            PromptKind::User => embedded::user_prompt(op, version),
            PromptKind::Schema => embedded::schema(op, version),
        }
    }
}

/// Result of a successful [`PromptRegistry::store`].
#[derive(Debug, Clone)]
pub struct StoredPrompt {
    pub provider: String,
    pub name: String,
    pub path: PathBuf,
    pub size: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PromptRegistry {
    root: PathBuf,
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_DIR)
    }
}

impl PromptRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk candidates in lookup order: provider-specific, then shared.
    pub fn candidate_paths(
        &self,
        kind: PromptKind,
        op: Operation,
        provider: &str,
        version: ApiVersion,
    ) -> Vec<PathBuf> {
        let file = kind.file_name(op);
        let provider_dir = self.root.join(provider).join("prompt");
        let provider_path = match version {
            ApiVersion::V1 => provider_dir.join(&file),
            ApiVersion::V2 => provider_dir.join("v2").join(&file),
        };
        let shared_path = self.root.join("prompt").join(version.as_str()).join(&file);
        vec![provider_path, shared_path]
    }

    /// Resolve a prompt text. `Ok(None)` means no file and no embedded default
    /// exist, which is normal for user prompts of most operations.
    pub async fn load(
        &self,
        kind: PromptKind,
        op: Operation,
        provider: &str,
        version: ApiVersion,
    ) -> Result<Option<String>, LlmError> {
        for path in self.candidate_paths(kind, op, provider, version) {
            match fs::read_to_string(&path).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(path = %path.display(), "Loaded prompt from disk");
                    return Ok(Some(text));
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Prompt file unreadable; skipping"),
            }
        }
        Ok(kind.embedded(op, version).map(str::to_string))
    }

    /// System prompt for an operation. Missing everywhere is an `UnknownSchema`.
    pub async fn system_prompt(
        &self,
        op: Operation,
        provider: &str,
        version: ApiVersion,
    ) -> Result<String, LlmError> {
        self.load(PromptKind::System, op, provider, version)
            .await?
            .ok_or_else(|| LlmError::UnknownSchema(format!("{}/{}", version.as_str(), op.as_str())))
    }

    pub async fn user_prompt(
        &self,
        op: Operation,
        provider: &str,
        version: ApiVersion,
    ) -> Result<Option<String>, LlmError> {
        self.load(PromptKind::User, op, provider, version).await
    }

    /// Write `<root>/<provider>/prompt/<name>.txt` atomically. Concurrent
    /// readers see either the old or the new complete text.
    pub async fn store(&self, provider: &str, name: &str, text: &str) -> Result<StoredPrompt, LlmError> {
        if !PROVIDER_NAME.is_match(provider) {
            return Err(LlmError::InvalidRequest(format!("invalid provider name {provider:?}")));
        }
        if !PROMPT_NAME.is_match(name) {
            return Err(LlmError::InvalidRequest(format!("invalid prompt name {name:?}")));
        }
        if text.len() > MAX_PROMPT_BYTES {
            return Err(LlmError::InvalidRequest(format!(
                "prompt is {} bytes; limit is {MAX_PROMPT_BYTES}",
                text.len()
            )));
        }

        let dir = self.root.join(provider).join("prompt");
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{name}.txt"));
        let tmp = dir.join(temp_name(name));

        if let Err(e) = fs::write(&tmp, text.as_bytes()).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!(provider, name, bytes = text.len(), path = %path.display(), "Stored prompt");
        Ok(StoredPrompt {
            provider: provider.to_string(),
            name: name.to_string(),
            path,
            size: text.len(),
            updated_at: Utc::now(),
        })
    }
}

fn temp_name(name: &str) -> String {
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!(".{name}.{}.{nanos}.{seq}.tmp", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn falls_back_to_embedded_prompts() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PromptRegistry::new(dir.path());
        let text = registry
            .system_prompt(Operation::Hint, "gemini", ApiVersion::V1)
            .await
            .unwrap();
        assert_eq!(text, embedded::system_prompt(Operation::Hint, ApiVersion::V1).unwrap());
        assert!(registry
            .user_prompt(Operation::Hint, "gemini", ApiVersion::V1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn provider_file_beats_shared_file() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("prompt").join("v2");
        let provider = dir.path().join("gpt").join("prompt").join("v2");
        std::fs::create_dir_all(&shared).unwrap();
        std::fs::create_dir_all(&provider).unwrap();
        std::fs::write(shared.join("hint.txt"), "shared hint").unwrap();
        std::fs::write(provider.join("hint.txt"), "gpt hint").unwrap();

        let registry = PromptRegistry::new(dir.path());
        let gpt = registry.system_prompt(Operation::Hint, "gpt", ApiVersion::V2).await.unwrap();
        let gemini = registry.system_prompt(Operation::Hint, "gemini", ApiVersion::V2).await.unwrap();
        assert_eq!(gpt, "gpt hint");
        assert_eq!(gemini, "shared hint");
    }

    #[tokio::test]
    async fn unknown_operation_has_no_prompt() {
        let registry = PromptRegistry::new("/nonexistent-prompt-root");
        let err = registry
            .system_prompt(Operation::Ocr, "gpt", ApiVersion::V1)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::UnknownSchema(_)));
    }

    #[tokio::test]
    async fn store_validates_names_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PromptRegistry::new(dir.path());
        for (provider, name) in [("GPT", "hint"), ("gpt", "../hint"), ("gpt", ""), ("gpt/x", "hint")] {
            let err = registry.store(provider, name, "x").await.unwrap_err();
            assert!(matches!(err, LlmError::InvalidRequest(_)), "{provider}/{name}");
        }
        let big = "x".repeat(MAX_PROMPT_BYTES + 1);
        assert!(matches!(
            registry.store("gpt", "hint", &big).await.unwrap_err(),
            LlmError::InvalidRequest(_)
        ));
    }

    #[tokio::test]
    async fn stored_prompt_is_used_by_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PromptRegistry::new(dir.path());
        let stored = registry.store("gemini", "parse", "custom parse").await.unwrap();
        assert_eq!(stored.size, "custom parse".len());
        assert_eq!(stored.path, dir.path().join("gemini/prompt/parse.txt"));
        let text = registry
            .system_prompt(Operation::Parse, "gemini", ApiVersion::V1)
            .await
            .unwrap();
        assert_eq!(text, "custom parse");
    }

    #[tokio::test]
    async fn concurrent_readers_never_see_partial_writes() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(PromptRegistry::new(dir.path()));
        let old = "A".repeat(64 * 1024);
        let new = "B".repeat(64 * 1024);
        registry.store("gpt", "hint", &old).await.unwrap();

        let writer = {
            let registry = Arc::clone(&registry);
            let (old, new) = (old.clone(), new.clone());
            tokio::spawn(async move {
                for i in 0..20 {
                    let text = if i % 2 == 0 { &new } else { &old };
                    registry.store("gpt", "hint", text).await.unwrap();
                }
            })
        };
        let path = dir.path().join("gpt/prompt/hint.txt");
        let mut readers = Vec::new();
        for _ in 0..4 {
            let (path, old, new) = (path.clone(), old.clone(), new.clone());
            readers.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let text = tokio::fs::read_to_string(&path).await.unwrap();
                    assert!(text == old || text == new, "partial read of {} bytes", text.len());
                    tokio::task::yield_now().await;
                }
            }));
        }
        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("gpt/prompt"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
