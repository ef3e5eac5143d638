//! The Waitlist: an ordered container of scheduled items and the readiness
//! check the Orchestrator uses to pick which ones to run in a cycle.

use crate::blackboard::{Blackboard, ConceptStatus};
use crate::concept::ConceptRepo;
use crate::inference::{InferenceEntry, InferenceRepo};

/// One scheduled item, identified by its flow index. The item's declarative
/// content lives in the paired [`InferenceRepo`]; the Waitlist only fixes
/// scheduling order.
#[derive(Debug, Clone)]
pub struct Item {
    /// Flow index of the wrapped [`InferenceEntry`].
    pub flow_index: String,
}

/// Ordered container of every inference's scheduled item, in declaration
/// order. Order is significant: within one cycle, an item only becomes
/// eligible for the *same* cycle if it appears later in the waitlist than
/// whatever unblocked it (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct Waitlist {
    items: Vec<Item>,
}

impl Waitlist {
    /// Builds a waitlist holding one item per entry in `repo`, ordered by
    /// flow index's natural (dotted, numeric) ordering.
    pub fn from_inference_repo(repo: &InferenceRepo) -> Self {
        let mut flow_indices: Vec<&String> = repo.iter().map(|(k, _)| k).collect();
        flow_indices.sort_by(|a, b| compare_flow_index(a, b));
        let items = flow_indices
            .into_iter()
            .map(|flow_index| Item { flow_index: flow_index.clone() })
            .collect();
        Self { items }
    }

    /// Items in scheduling order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// True iff every value concept and context concept of `entry` (resolved
    /// through identity aliases) is `complete` and carries at least one
    /// non-skip cell, unless `inputs_optional` declares that this sequence
    /// variant tolerates empty inputs (e.g. a `@all`/`@some` grouping with a
    /// vacuous quantifier base).
    pub fn is_ready(
        entry: &InferenceEntry,
        concept_repo: &ConceptRepo,
        blackboard: &Blackboard,
        inputs_optional: bool,
    ) -> bool {
        let inputs = entry.value_concepts.iter().chain(entry.context_concepts.iter());
        for name in inputs {
            if blackboard.concept_status(name) != ConceptStatus::Complete {
                return false;
            }
            if !inputs_optional {
                let has_data = concept_repo
                    .get_concept(name)
                    .and_then(|c| c.reference.as_ref())
                    .map(|r| r.has_any_data())
                    .unwrap_or(false);
                if !has_data {
                    return false;
                }
            }
        }
        if let Some(function_concept) = &entry.function_concept {
            if blackboard.concept_status(function_concept) != ConceptStatus::Complete {
                return false;
            }
        }
        true
    }
}

/// Orders two dotted flow indices numerically component-by-component so that
/// `"1.2" < "1.10"` (not the lexicographic `"1.10" < "1.2"`).
fn compare_flow_index(a: &str, b: &str) -> std::cmp::Ordering {
    let pa = a.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    let pb = b.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    pa.cmp(pb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::FlowInfo;
    use std::collections::HashSet;

    fn entry(flow_index: &str, value_concepts: Vec<&str>) -> InferenceEntry {
        InferenceEntry {
            concept_to_infer: Some(format!("c{flow_index}")),
            value_concepts: value_concepts.into_iter().map(String::from).collect(),
            context_concepts: vec![],
            function_concept: None,
            working_interpretation: serde_json::Map::new(),
            inference_sequence: "simple".into(),
            flow_info: FlowInfo { flow_index: flow_index.to_string() },
        }
    }

    #[test]
    fn flow_index_ordering_is_numeric_not_lexicographic() {
        let mut v = vec!["1.10".to_string(), "1.2".to_string(), "1.1".to_string()];
        v.sort_by(|a, b| compare_flow_index(a, b));
        assert_eq!(v, vec!["1.1", "1.2", "1.10"]);
    }

    #[test]
    fn ready_requires_complete_status_and_data() {
        let mut concept_repo = ConceptRepo::from_json_list(
            &serde_json::json!([
                {"concept_name": "a", "type": "semantical", "context": "c", "axis_name": "x"},
            ]),
            &HashSet::new(),
        )
        .unwrap();
        let mut bb = Blackboard::new();
        let e = entry("1", vec!["a"]);

        assert!(!Waitlist::is_ready(&e, &concept_repo, &bb, false));

        bb.set_concept_status("a", ConceptStatus::Complete);
        assert!(!Waitlist::is_ready(&e, &concept_repo, &bb, false), "complete but no data yet");

        concept_repo.add_reference("a", serde_json::json!(["1"]), None).unwrap();
        assert!(Waitlist::is_ready(&e, &concept_repo, &bb, false));
    }

    #[test]
    fn inputs_optional_skips_the_data_check() {
        let concept_repo = ConceptRepo::from_json_list(
            &serde_json::json!([{"concept_name": "a", "type": "semantical", "context": "c", "axis_name": "x"}]),
            &HashSet::new(),
        )
        .unwrap();
        let mut bb = Blackboard::new();
        bb.set_concept_status("a", ConceptStatus::Complete);
        let e = entry("1", vec!["a"]);
        assert!(Waitlist::is_ready(&e, &concept_repo, &bb, true));
    }
}
