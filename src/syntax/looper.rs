//! The Looper: structurally identical to the [`super::quantifier::Quantifier`]
//! but additionally supports carrying an in-loop concept's value forward
//! across iterations, the accumulator pattern (spec §4.6).

use crate::error::Result;
use crate::reference::Reference;
use crate::syntax::quantifier::LoopWorkspace;

/// How [`Looper::retrieve_next_in_loop_element`] resolves a prior value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarryOverMode {
    /// Look back to the immediately preceding iteration's stored value.
    CarryOver,
}

/// Thin wrapper adding accumulator carry-over reads over a shared [`LoopWorkspace`].
pub struct Looper;

impl Looper {
    /// Returns the value of `concept_name` one iteration before
    /// `current_loop_index` (i.e. at `current_loop_index - 1`), or
    /// `initial_reference` when there is no such prior iteration (the first
    /// pass through the loop).
    pub fn retrieve_next_in_loop_element(
        workspace: &LoopWorkspace,
        group_key: &[usize],
        concept_name: &str,
        mode: CarryOverMode,
        current_loop_index: usize,
        initial_reference: &Reference,
    ) -> Result<Reference> {
        let CarryOverMode::CarryOver = mode;
        match current_loop_index.checked_sub(1).and_then(|prior| workspace.in_loop_value(group_key, prior, concept_name)) {
            Some(reference) => Ok(reference.clone()),
            None => Ok(initial_reference.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn falls_back_to_initial_reference_on_first_iteration() {
        let ws = LoopWorkspace::new();
        let initial = Reference::from_data(json!([0]), Some(vec!["_none_axis".into()])).unwrap();
        let got = Looper::retrieve_next_in_loop_element(&ws, &[], "accumulator", CarryOverMode::CarryOver, 0, &initial).unwrap();
        assert_eq!(got.data, initial.data);
    }

    #[test]
    fn carries_over_the_prior_iterations_value() {
        let mut ws = LoopWorkspace::new();
        let prior = Reference::from_data(json!([5]), Some(vec!["_none_axis".into()])).unwrap();
        ws.store_new_in_loop_element(&[], 0, "accumulator", prior.clone());
        let initial = Reference::from_data(json!([0]), Some(vec!["_none_axis".into()])).unwrap();
        let got = Looper::retrieve_next_in_loop_element(&ws, &[], "accumulator", CarryOverMode::CarryOver, 1, &initial).unwrap();
        assert_eq!(got.data, prior.data);
    }
}
