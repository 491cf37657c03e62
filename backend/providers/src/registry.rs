use std::collections::BTreeMap;
use std::sync::Arc;

use lessonkit_core::{Engine, EngineDescriptor, LlmError};

/// Alternative names accepted in `llm_name`.
const ALIASES: [(&str, &str); 3] = [("openai", "gpt"), ("chatgpt", "gpt"), ("google", "gemini")];

/// Registry of configured engines, looked up by name or alias.
#[derive(Default, Clone)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn Engine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine under its own name, replacing any previous one.
    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        self.engines.insert(engine.name().to_string(), engine);
    }

    pub fn with(mut self, engine: Arc<dyn Engine>) -> Self {
        self.register(engine);
        self
    }

    pub fn canonical_name(name: &str) -> String {
        let lowered = name.trim().to_ascii_lowercase();
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == lowered)
            .map(|(_, canonical)| canonical.to_string())
            .unwrap_or(lowered)
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Engine>, LlmError> {
        self.engines
            .get(&Self::canonical_name(name))
            .cloned()
            .ok_or_else(|| LlmError::UnknownProvider {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> Vec<EngineDescriptor> {
        self.engines.values().map(|e| e.descriptor()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
