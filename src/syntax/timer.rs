//! The Timer: evaluates a timing condition against the Blackboard and, for
//! `@if`/`@if!` gates on a judgement, injects a filter for the parent's next
//! IR step (spec §4.6/§4.7).

use crate::blackboard::{Blackboard, ConceptStatus};
use crate::error::{Error, Result};
use crate::workspace::FilterSpec;

/// The closed timing-condition grammar (spec §6): `@after C`, `@if C`, `@if! C`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimingCondition {
    /// `@after C` — true iff `C` has status `complete`.
    After(String),
    /// `@if C` — ready once `C` completes; skipped iff its detail is `condition_not_met`.
    If(String),
    /// `@if! C` — the inverse of [`TimingCondition::If`].
    IfNot(String),
}

impl TimingCondition {
    /// Parses a condition string, e.g. `"@after {sum}"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("@after ") {
            return Ok(Self::After(rest.trim().to_string()));
        }
        if let Some(rest) = raw.strip_prefix("@if! ") {
            return Ok(Self::IfNot(rest.trim().to_string()));
        }
        if let Some(rest) = raw.strip_prefix("@if ") {
            return Ok(Self::If(rest.trim().to_string()));
        }
        Err(Error::Repo(format!("malformed timing condition '{raw}'")))
    }

    /// The concept name this condition gates on.
    pub fn concept_name(&self) -> &str {
        match self {
            Self::After(c) | Self::If(c) | Self::IfNot(c) => c,
        }
    }
}

/// The outcome of evaluating a timing condition: whether the parent is
/// allowed to proceed this cycle, and whether it should be skipped
/// (`condition_not_met`) rather than actually run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingOutcome {
    /// True once the condition is decidable (the gated concept has completed,
    /// for `@if`/`@if!`; or simply completed, for `@after`).
    pub ready: bool,
    /// True iff the parent inference should be skipped rather than executed.
    pub to_be_skipped: bool,
}

/// Stateless timing evaluation.
pub struct Timer;

impl Timer {
    /// Evaluates `condition` against `blackboard`.
    pub fn evaluate(condition: &TimingCondition, blackboard: &Blackboard) -> TimingOutcome {
        match condition {
            TimingCondition::After(concept) => TimingOutcome {
                ready: blackboard.concept_status(concept) == ConceptStatus::Complete,
                to_be_skipped: false,
            },
            TimingCondition::If(concept) => Self::check_if(blackboard, concept, false),
            TimingCondition::IfNot(concept) => Self::check_if(blackboard, concept, true),
        }
    }

    fn check_if(blackboard: &Blackboard, concept: &str, invert: bool) -> TimingOutcome {
        if blackboard.concept_status(concept) != ConceptStatus::Complete {
            return TimingOutcome { ready: false, to_be_skipped: false };
        }
        let flow_index = blackboard.concept_flow_index(concept);
        let detail = flow_index.and_then(|fi| blackboard.completion_detail(fi));
        let condition_met = !matches!(detail, Some("condition_not_met"));
        let skip = condition_met == invert;
        TimingOutcome { ready: true, to_be_skipped: skip }
    }

    /// When `condition` is an `@if`/`@if!` that resolved ready-and-not-skipped,
    /// and the judged concept published a truth mask, builds the
    /// [`FilterSpec`] the parent's IR step should apply.
    pub fn filter_spec_for(condition: &TimingCondition, blackboard: &Blackboard) -> Option<FilterSpec> {
        if matches!(condition, TimingCondition::After(_)) {
            return None;
        }
        let mask = blackboard.truth_mask(condition.concept_name())?;
        let extent = mask.reference.shape.first().copied().unwrap_or(0);
        let keep: Vec<bool> = (0..extent)
            .map(|i| mask.reference.get_full(&[i]) == serde_json::json!("%{truth value}(true)"))
            .collect();
        Some(FilterSpec { filter_axis: mask.filter_axis.clone(), keep })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::ConceptStatus;

    #[test]
    fn parse_rejects_malformed_condition() {
        assert!(TimingCondition::parse("after {x}").is_err());
    }

    #[test]
    fn after_is_ready_once_complete() {
        let mut bb = Blackboard::new();
        let cond = TimingCondition::parse("@after {sum}").unwrap();
        assert!(!Timer::evaluate(&cond, &bb).ready);
        bb.set_concept_status("{sum}", ConceptStatus::Complete);
        assert!(Timer::evaluate(&cond, &bb).ready);
    }

    #[test]
    fn if_condition_not_met_is_ready_and_skipped() {
        let mut bb = Blackboard::new();
        bb.set_concept_status("{judge}", ConceptStatus::Complete);
        bb.set_completion_detail("1.1", "condition_not_met");
        bb.set_concept_flow_index("{judge}", "1.1");
        let cond = TimingCondition::parse("@if {judge}").unwrap();
        let outcome = Timer::evaluate(&cond, &bb);
        assert!(outcome.ready);
        assert!(outcome.to_be_skipped);
    }

    #[test]
    fn if_not_inverts_the_skip_decision() {
        let mut bb = Blackboard::new();
        bb.set_concept_status("{judge}", ConceptStatus::Complete);
        bb.set_completion_detail("1.1", "success");
        bb.set_concept_flow_index("{judge}", "1.1");
        let cond = TimingCondition::parse("@if! {judge}").unwrap();
        let outcome = Timer::evaluate(&cond, &bb);
        assert!(outcome.ready);
        assert!(outcome.to_be_skipped);
    }
}
