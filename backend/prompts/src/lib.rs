//! Prompt texts and JSON schemas for every operation, with on-disk overrides.

pub mod embedded;
pub mod prompt;
pub mod schema;
pub mod strict;

pub use prompt::{PromptKind, PromptRegistry, StoredPrompt, DEFAULT_PROMPT_DIR, MAX_PROMPT_BYTES};
pub use schema::{SchemaHandle, SchemaRegistry, DRAFT_07};
pub use strict::{strictify, strictify_in_place};
