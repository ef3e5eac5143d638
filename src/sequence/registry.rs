//! `SequenceKind → step list` lookup table (spec §4.5, §9 "Dynamic dispatch").

use crate::inference::SequenceKind;

/// One step code in the closed step vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Input Working Interpretation.
    Iwi,
    /// Input References.
    Ir,
    /// Model Function Perception.
    Mfp,
    /// Memory Value Perception.
    Mvp,
    /// Tool Value Actuation.
    Tva,
    /// Tool Inference Perception (judgement's boolean mask; passthrough otherwise).
    Tip,
    /// Truth Inference Assertion (in-composition hierarchical collapse).
    Tia,
    /// Memory Inference Actuation (normcode wrapper).
    Mia,
    /// Grouping References.
    Gr,
    /// Quantifying References.
    Qr,
    /// Looping References.
    Lr,
    /// Assigning References.
    Ar,
    /// Timing.
    T,
    /// Output Reference.
    Or,
    /// Output Working Interpretation.
    Owi,
}

/// Returns the ordered step list for `kind`.
///
/// `imperative_direct`, `imperative_input`, `imperative_python`,
/// `imperative_python_indirect` share `imperative`'s list and defaults, as do
/// `judgement_direct`, `judgement_python`, `judgement_python_indirect` with
/// `judgement` — none of these distinguish their behavior without a paradigm
/// file, so this implementation applies the base variant's step chain to all
/// of them (recorded in the grounding ledger as an Open Question resolution).
/// `imperative_in_composition` is not named as its own variant in the
/// sequence catalog; it is resolved the same way as `judgement_in_composition`
/// (TIA instead of TIP) since both describe hierarchical, in-composition
/// aggregation over the same TVA output shape. Neither in-composition variant
/// runs MIA: TIA produces the final collapsed reference directly (see
/// `steps::tia`), since composition nests the truth assertion inside a larger
/// aggregate that applies its own wrapping downstream.
pub fn step_list(kind: SequenceKind) -> &'static [Step] {
    use SequenceKind::*;
    use Step::*;
    match kind {
        Simple => &[Iwi, Ir, Or, Owi],
        Imperative | ImperativeDirect | ImperativeInput | ImperativePython | ImperativePythonIndirect => {
            &[Iwi, Ir, Mfp, Mvp, Tva, Tip, Mia, Or, Owi]
        }
        ImperativeInComposition => &[Iwi, Ir, Mfp, Mvp, Tva, Tia, Or, Owi],
        Grouping => &[Iwi, Ir, Gr, Or, Owi],
        Quantifying => &[Iwi, Ir, Gr, Qr, Or, Owi],
        Looping => &[Iwi, Ir, Gr, Lr, Or, Owi],
        Assigning => &[Iwi, Ir, Ar, Or, Owi],
        Timing => &[Iwi, T, Owi],
        Judgement | JudgementDirect | JudgementPython | JudgementPythonIndirect => {
            &[Iwi, Ir, Mfp, Mvp, Tva, Tip, Mia, Or, Owi]
        }
        JudgementInComposition => &[Iwi, Ir, Mfp, Mvp, Tva, Tia, Or, Owi],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_never_produces_a_concept() {
        assert!(!step_list(SequenceKind::Timing).contains(&Step::Or));
    }

    #[test]
    fn imperative_aliases_share_the_base_step_list() {
        assert_eq!(step_list(SequenceKind::Imperative), step_list(SequenceKind::ImperativeDirect));
        assert_eq!(step_list(SequenceKind::Imperative), step_list(SequenceKind::ImperativePythonIndirect));
    }

    #[test]
    fn judgement_in_composition_uses_tia_not_tip() {
        let steps = step_list(SequenceKind::JudgementInComposition);
        assert!(steps.contains(&Step::Tia));
        assert!(!steps.contains(&Step::Tip));
    }

    #[test]
    fn in_composition_variants_never_run_mia() {
        assert!(!step_list(SequenceKind::JudgementInComposition).contains(&Step::Mia));
        assert!(!step_list(SequenceKind::ImperativeInComposition).contains(&Step::Mia));
    }
}
