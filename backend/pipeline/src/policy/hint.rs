use lessonkit_core::contracts::{v1, v2};
use lessonkit_core::{HintLevel, TerminologyLevel};

/// Pin the level and terminology to the request and forbid final answers.
pub fn apply_hint_defaults(result: &mut v1::HintResult, level: HintLevel, terminology: TerminologyLevel) {
    result.level = Some(level);
    result.terminology_level.get_or_insert(terminology);
    result.no_final_answer = true;
}

pub fn apply_hint_defaults_v2(result: &mut v2::HintResult, level: HintLevel, terminology: TerminologyLevel) {
    result.level = Some(level);
    result.terminology_level.get_or_insert(terminology);
    result.no_final_answer = true;
}
