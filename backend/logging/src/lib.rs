//! Structured logging for lessonkit.
//!
//! Console and rolling NDJSON output, redaction of credentials in provider
//! error bodies, and the per-operation event log.

pub mod logger;
pub mod op_events;
pub mod redact;

pub use logger::init_logger;
pub use op_events::{OperationEvent, OperationOutcome};
pub use redact::redact_sensitive_data;
