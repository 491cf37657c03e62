//! Core types shared by every lessonkit crate: operations, images, the error
//! taxonomy, the engine trait and the v1/v2 operation contracts.

pub mod contracts;
pub mod error;
pub mod image;
pub mod traits;
pub mod types;

pub use contracts::{AnswerShape, ConfirmationReason, ConfirmationScores};
pub use error::{truncate_bytes, truncate_chars, LlmError};
pub use image::{pick_mime, sniff_mime, ImageBlob, ImageHash};
pub use traits::{Engine, StructuredCall, VISION_ENGINES};
pub use types::{ApiVersion, EngineDescriptor, HintLevel, Operation, Sampling, TerminologyLevel};
