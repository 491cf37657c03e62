//! Post-policies applied to engine output before it is cached or returned.
//!
//! Every policy is a projection: applying it twice gives the same result as
//! applying it once, and none of them can fail.

mod analogue;
mod check;
mod detect;
mod hint;
mod items;
mod limits;
mod parse;

pub use analogue::apply_analogue_defaults;
pub use check::{normalize_check_v12, CHECK_SCHEMA_VERSION};
pub use detect::apply_detect_verbatim;
pub use hint::{apply_hint_defaults, apply_hint_defaults_v2};
pub use items::{extract_step_answer, normalize_answer, validate_parse_items};
pub use limits::{apply_normalize_limits, apply_ocr_clamp, NORMALIZE_MESSAGE_MAX_CHARS};
pub use parse::{apply_parse_policy, confirmation_decision, MAX_MEANING_CHANGE_RISK, MIN_CONFIDENCE};
