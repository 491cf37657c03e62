use lessonkit_core::contracts::{v1::NormalizeResult, v2::OcrResult};
use lessonkit_core::truncate_chars;

pub const NORMALIZE_MESSAGE_MAX_CHARS: usize = 120;

pub fn apply_normalize_limits(result: &mut NormalizeResult) {
    if let Some(message) = result.needs_user_action_message.as_mut() {
        *message = truncate_chars(message, NORMALIZE_MESSAGE_MAX_CHARS);
    }
}

pub fn apply_ocr_clamp(result: &mut OcrResult) {
    result.confidence = clamp_unit(result.confidence);
}

/// Clamp into `[0, 1]`; NaN becomes 0.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
