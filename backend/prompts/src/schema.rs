//! Output schemas per (operation, version), loaded once and memoized together
//! with their strictified form.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use lessonkit_core::{ApiVersion, LlmError, Operation};
use serde_json::Value;
use tracing::{debug, warn};

use crate::embedded;
use crate::strict::strictify;

pub const DRAFT_07: &str = "http://json-schema.org/draft-07/schema#";

/// A loaded schema and its strict variant.
#[derive(Debug, Clone)]
pub struct SchemaHandle {
    pub raw: Arc<Value>,
    pub strict: Arc<Value>,
}

pub struct SchemaRegistry {
    root: Option<PathBuf>,
    memo: RwLock<HashMap<(Operation, ApiVersion), SchemaHandle>>,
}

impl SchemaRegistry {
    /// `root` is the prompt directory holding `prompt/<version>/<op>.schema.json`
    /// overrides. `None` uses embedded schemas only.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            memo: RwLock::new(HashMap::new()),
        }
    }

    pub fn embedded_only() -> Self {
        Self::new(None)
    }

    pub async fn get(&self, op: Operation, version: ApiVersion) -> Result<SchemaHandle, LlmError> {
        if let Some(handle) = self.cached(op, version) {
            return Ok(handle);
        }

        let name = schema_name(op, version);
        let text = match self.read_override(op, version).await {
            Some(text) => text,
            None => embedded::schema(op, version)
                .ok_or_else(|| LlmError::UnknownSchema(name.clone()))?
                .to_string(),
        };
        let handle = build_handle(&name, &text)?;

        let mut memo = self
            .memo
            .write()
            .map_err(|_| LlmError::Internal("schema memo poisoned".into()))?;
        // A concurrent loader may have won; keep its entry.
        Ok(memo.entry((op, version)).or_insert(handle).clone())
    }

    pub async fn get_by_name(&self, name: &str, version: ApiVersion) -> Result<SchemaHandle, LlmError> {
        let op: Operation = name.parse()?;
        self.get(op, version).await
    }

    /// Drop memoized schemas so the next `get` reloads them.
    pub fn invalidate(&self) {
        if let Ok(mut memo) = self.memo.write() {
            memo.clear();
        }
    }

    fn cached(&self, op: Operation, version: ApiVersion) -> Option<SchemaHandle> {
        self.memo.read().ok()?.get(&(op, version)).cloned()
    }

    async fn read_override(&self, op: Operation, version: ApiVersion) -> Option<String> {
        let path = override_path(self.root.as_deref()?, op, version);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) if !text.trim().is_empty() => {
                debug!(path = %path.display(), "Using schema override");
                Some(text)
            }
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Schema override unreadable; using embedded");
                None
            }
        }
    }
}

fn override_path(root: &Path, op: Operation, version: ApiVersion) -> PathBuf {
    root.join("prompt")
        .join(version.as_str())
        .join(format!("{}.schema.json", op.as_str()))
}

fn schema_name(op: Operation, version: ApiVersion) -> String {
    format!("{}/{}", version.as_str(), op.as_str())
}

fn build_handle(name: &str, text: &str) -> Result<SchemaHandle, LlmError> {
    let mut raw: Value = serde_json::from_str(text).map_err(|e| LlmError::BadSchema {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    let Value::Object(map) = &mut raw else {
        return Err(LlmError::BadSchema {
            name: name.to_string(),
            message: "schema root is not an object".into(),
        });
    };
    map.entry("$schema")
        .or_insert_with(|| Value::String(DRAFT_07.to_string()));

    let strict = strictify(&raw);
    Ok(SchemaHandle {
        raw: Arc::new(raw),
        strict: Arc::new(strict),
    })
}
