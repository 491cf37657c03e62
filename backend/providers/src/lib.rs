//! Engine adapters: OpenAI (responses and chat), Gemini, DeepSeek and
//! YandexGPT, plus the shared transport, envelope extraction and registry.

pub mod deepseek;
pub mod extract;
pub mod gemini;
pub mod mock;
pub mod openai;
pub mod registry;
pub mod retry;
#[cfg(test)]
mod stub;
pub mod transport;
pub mod yandex;

pub use deepseek::DeepSeekEngine;
pub use extract::decode_json;
pub use gemini::GeminiEngine;
pub use mock::MockEngine;
pub use openai::{OpenAiEndpoint, OpenAiEngine};
pub use registry::EngineRegistry;
pub use retry::RetryPolicy;
pub use transport::{build_client, TransportSettings};
pub use yandex::{IamTokenCache, YandexEngine};

use lessonkit_core::StructuredCall;

/// System text for endpoints without native schema enforcement: the
/// operation prompt followed by the raw schema.
pub(crate) fn system_with_schema(call: &StructuredCall) -> String {
    let schema = serde_json::to_string_pretty(call.schema.as_ref()).unwrap_or_default();
    format!(
        "{}\n\nReturn only a JSON object that matches this JSON schema:\n{}",
        call.system_prompt.trim_end(),
        schema
    )
}
