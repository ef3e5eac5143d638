//! The Quantifier: advances a loop over a "to-loop" candidate list one
//! element per cycle, recording per-element results, and detecting when
//! every candidate has been visited (spec §4.6).
//!
//! The [`LoopWorkspace`] it operates on is shared with [`super::looper::Looper`]:
//! both helpers iterate the same kind of per-(loop base, iteration) arena,
//! differing only in how they expose carry-over access to prior iterations.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::reference::{is_skip, Reference};

/// One committed loop iteration: the base element that drove it, plus
/// whatever in-loop concept values were observed while processing it.
#[derive(Debug, Clone, Default)]
pub struct IterationRecord {
    /// The to-loop candidate element this iteration was built around.
    pub base_element: Option<Json>,
    /// In-loop concept values observed during this iteration, keyed by
    /// concept name.
    pub in_loop: HashMap<String, Reference>,
}

/// Arena of per-group iteration records. `group_key` is the tuple of group
/// axis indices a nested Grouping pass selected (empty for an ungrouped
/// loop); each group has its own independent iteration sequence.
#[derive(Debug, Clone, Default)]
pub struct LoopWorkspace {
    groups: HashMap<Vec<usize>, Vec<IterationRecord>>,
}

impl LoopWorkspace {
    /// Builds an empty workspace.
    pub fn new() -> Self {
        Self::default()
    }

    fn iterations(&self, group_key: &[usize]) -> &[IterationRecord] {
        self.groups.get(group_key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn iterations_mut(&mut self, group_key: &[usize]) -> &mut Vec<IterationRecord> {
        self.groups.entry(group_key.to_vec()).or_default()
    }

    /// True iff `element` has not already been committed as a base element
    /// in this group (spec: `_check_new_base_element_by_looped_base_element`).
    pub fn is_new_base_element(&self, group_key: &[usize], element: &Json) -> bool {
        !self.iterations(group_key).iter().any(|it| it.base_element.as_ref() == Some(element))
    }

    /// Scans `to_loop_elements` for the next element that is neither
    /// `current` nor already recorded in this group, returning it alongside
    /// the tentative iteration index it would occupy.
    pub fn retrieve_next_base_element(
        &self,
        group_key: &[usize],
        to_loop_elements: &[Json],
        current: Option<&Json>,
    ) -> Option<(Json, usize)> {
        let next_index = self.iterations(group_key).len();
        for element in to_loop_elements {
            if is_skip(element) {
                continue;
            }
            if Some(element) == current {
                continue;
            }
            if self.is_new_base_element(group_key, element) {
                return Some((element.clone(), next_index));
            }
        }
        None
    }

    /// Commits `element` as the base element of iteration `index`.
    pub fn store_new_base_element(&mut self, group_key: &[usize], index: usize, element: Json) {
        let iterations = self.iterations_mut(group_key);
        while iterations.len() <= index {
            iterations.push(IterationRecord::default());
        }
        iterations[index].base_element = Some(element);
    }

    /// Commits a per-iteration in-loop concept value.
    pub fn store_new_in_loop_element(&mut self, group_key: &[usize], index: usize, concept_name: &str, reference: Reference) {
        let iterations = self.iterations_mut(group_key);
        while iterations.len() <= index {
            iterations.push(IterationRecord::default());
        }
        iterations[index].in_loop.insert(concept_name.to_string(), reference);
    }

    /// Reads back a concept value stored at a specific iteration index, if any.
    pub fn in_loop_value(&self, group_key: &[usize], index: usize, concept_name: &str) -> Option<&Reference> {
        self.iterations(group_key).get(index).and_then(|it| it.in_loop.get(concept_name))
    }

    /// Number of committed iterations for this group.
    pub fn iteration_count(&self, group_key: &[usize]) -> usize {
        self.iterations(group_key).len()
    }

    /// True iff every non-skip candidate in `to_loop_elements` has already
    /// been committed as a base element (spec: `check_all_base_elements_looped`).
    pub fn check_all_base_elements_looped(&self, group_key: &[usize], to_loop_elements: &[Json]) -> bool {
        to_loop_elements
            .iter()
            .filter(|e| !is_skip(e))
            .all(|e| !self.is_new_base_element(group_key, e))
    }

    /// Joins every iteration's stored value for `concept_name` along a new
    /// axis named `concept_name`, then renames that join's innermost
    /// (originally-last) axis to `loop_base_axis_name`.
    pub fn combine_all_looped_elements_by_concept(
        &self,
        group_key: &[usize],
        concept_name: &str,
        loop_base_axis_name: &str,
    ) -> Result<Reference> {
        let iterations = self.iterations(group_key);
        let refs: Vec<&Reference> = iterations
            .iter()
            .filter_map(|it| it.in_loop.get(concept_name))
            .collect();
        if refs.is_empty() {
            return Err(Error::Shape(format!(
                "no iterations recorded a value for in-loop concept '{concept_name}'"
            )));
        }
        let joined = crate::reference::join(&refs, concept_name)?;
        let innermost = joined.axes.last().cloned().unwrap_or_default();
        if innermost == concept_name || innermost.is_empty() {
            Ok(joined)
        } else {
            joined.rename_axis(&innermost, loop_base_axis_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn advances_through_candidates_once_each() {
        let candidates = vec![json!("a"), json!("b"), json!("c")];
        let mut ws = LoopWorkspace::new();
        let key: Vec<usize> = vec![];

        let (first, idx0) = ws.retrieve_next_base_element(&key, &candidates, None).unwrap();
        assert_eq!(first, json!("a"));
        ws.store_new_base_element(&key, idx0, first.clone());

        let (second, idx1) = ws.retrieve_next_base_element(&key, &candidates, Some(&first)).unwrap();
        assert_eq!(second, json!("b"));
        ws.store_new_base_element(&key, idx1, second.clone());

        assert!(!ws.check_all_base_elements_looped(&key, &candidates));

        let (third, idx2) = ws.retrieve_next_base_element(&key, &candidates, Some(&second)).unwrap();
        ws.store_new_base_element(&key, idx2, third);
        assert!(ws.check_all_base_elements_looped(&key, &candidates));
    }

    #[test]
    fn empty_to_loop_elements_is_vacuously_done() {
        let ws = LoopWorkspace::new();
        assert!(ws.check_all_base_elements_looped(&[], &[]));
    }

    #[test]
    fn combine_renames_axes_per_spec() {
        let mut ws = LoopWorkspace::new();
        let key: Vec<usize> = vec![];
        let r0 = Reference::from_data(json!(["avg0"]), Some(vec!["_none_axis".into()])).unwrap();
        let r1 = Reference::from_data(json!(["avg1"]), Some(vec!["_none_axis".into()])).unwrap();
        ws.store_new_in_loop_element(&key, 0, "average", r0);
        ws.store_new_in_loop_element(&key, 1, "average", r1);
        let combined = ws.combine_all_looped_elements_by_concept(&key, "average", "student").unwrap();
        assert!(combined.axes.contains(&"average".to_string()));
        assert!(combined.axes.contains(&"student".to_string()));
    }
}
