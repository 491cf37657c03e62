use lessonkit_core::{ConfirmationReason, ConfirmationScores};

pub const MIN_CONFIDENCE: f64 = 0.80;
pub const MAX_MEANING_CHANGE_RISK: f64 = 0.20;

/// Whether the user must confirm a parse, and the first failing check.
///
/// A parse auto-accepts only with high confidence, low meaning-change risk,
/// no bracketed spans and no rescan request.
pub fn confirmation_decision(scores: &impl ConfirmationScores) -> (bool, ConfirmationReason) {
    let reason = if !(scores.confidence() >= MIN_CONFIDENCE) {
        ConfirmationReason::LowConfidence
    } else if scores.bracketed_spans_count() > 0 {
        ConfirmationReason::BracketedSpansPresent
    } else if !(scores.meaning_change_risk() <= MAX_MEANING_CHANGE_RISK) {
        ConfirmationReason::MeaningChangeRiskHigh
    } else if scores.needs_rescan() {
        ConfirmationReason::HasDiagramsOrLowQuality
    } else {
        ConfirmationReason::None
    };
    (reason != ConfirmationReason::None, reason)
}

/// Overwrite `confirmation_needed` and `confirmation_reason` from the scores.
pub fn apply_parse_policy<T: ConfirmationScores>(result: &mut T) {
    let (needed, reason) = confirmation_decision(result);
    result.set_confirmation(needed, reason);
}
