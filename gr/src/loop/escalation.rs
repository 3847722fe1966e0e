//! Tier escalation triggers and the DOM-extraction bypass

use crate::domain::PerceptionHint;
use crate::navigator::{ActionDecision, ActionKind, EscalationReason};
use crate::session::StructuredTreeCapture;

use super::perception::PageAssessment;

/// Decide whether a Tier 1 result must escalate to the visual tier
///
/// Trigger order follows the escalation table: low confidence, tier-one
/// FAILED, structured-deficient page, stalled progress, explicit hint.
pub fn evaluate_escalation(
    decision: &ActionDecision,
    assessment: PageAssessment,
    hint: PerceptionHint,
    stalled: bool,
    confidence_threshold: f64,
) -> Option<EscalationReason> {
    if decision.confidence < confidence_threshold {
        return Some(EscalationReason::LowConfidence);
    }
    if decision.kind == ActionKind::Failed {
        return Some(EscalationReason::TierOneFailed);
    }
    if assessment.structured_deficient {
        return Some(EscalationReason::StructuredDeficient);
    }
    if stalled {
        return Some(EscalationReason::NoProgress);
    }
    if hint == PerceptionHint::VisualRequired {
        return Some(EscalationReason::VisualHint);
    }
    None
}

/// Normalize an accessible label for exact matching
pub fn normalize_label(label: &str) -> String {
    label
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic DOM-extraction bypass between Tier 1 and Tier 2
///
/// When exactly one interactive element's normalized label matches the
/// intended target, a synthesized CLICK with confidence 1.0 replaces the
/// Tier 2 call for this step. A match is the whole normalized intent, or
/// a whole-label containment for labels of at least three characters.
pub fn dom_bypass(capture: &StructuredTreeCapture, intent: &str) -> Option<ActionDecision> {
    let normalized_intent = normalize_label(intent);
    if normalized_intent.is_empty() {
        return None;
    }

    let mut matched = None;
    for element in &capture.interactive_index {
        let label = normalize_label(&element.name);
        if label.len() < 3 {
            continue;
        }
        let exact = label == normalized_intent;
        let contained = normalized_intent
            .split(' ')
            .collect::<Vec<_>>()
            .windows(label.split(' ').count())
            .any(|w| w.join(" ") == label);
        if exact || contained {
            if matched.is_some() {
                // Ambiguous: more than one candidate, no bypass
                return None;
            }
            matched = Some(element);
        }
    }

    let element = matched?;
    let bounds = element.bounds?;
    let (x, y) = bounds.center();
    Some(ActionDecision::click(
        x,
        y,
        1.0,
        format!("exact label match on \"{}\"", element.name),
    ))
}
