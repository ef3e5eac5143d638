//! Declarative JSON loading for `concepts.json`, `inferences.json`, and
//! `inputs.json` (spec §6 External Interfaces).
//!
//! [`ConceptRepo::from_json_list`] needs the set of concept names no
//! inference produces before it can compute `is_final`, which is itself only
//! knowable once `inferences.json` has been scanned. [`load_repositories`]
//! resolves that ordering: it scans the raw inferences list for
//! `concept_to_infer` values first, builds the concept repo against the
//! complement, then builds the inference repo against it in the usual way.
//! `inputs.json`, when present, is applied last via [`apply_inputs`].

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value as Json;

use crate::concept::ConceptRepo;
use crate::error::{Error, Result};
use crate::inference::InferenceRepo;

fn read_json_file(path: &Path) -> Result<Json> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn concept_names(concepts_json: &Json) -> Result<HashSet<String>> {
    let list = concepts_json
        .as_array()
        .ok_or_else(|| Error::Repo("concept repo JSON must be a list".into()))?;
    list.iter()
        .map(|item| {
            item.get("concept_name")
                .and_then(Json::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Repo("concept entry missing 'concept_name'".into()))
        })
        .collect()
}

fn produced_concept_names(inferences_json: &Json) -> Result<HashSet<String>> {
    let list = inferences_json
        .as_array()
        .ok_or_else(|| Error::Repo("inference repo JSON must be a list".into()))?;
    Ok(list
        .iter()
        .filter_map(|item| item.get("concept_to_infer").and_then(Json::as_str))
        .map(str::to_string)
        .collect())
}

/// Loads and applies an `inputs.json` mapping onto an already-built
/// [`ConceptRepo`].
///
/// Each entry is either a raw value, seeded onto its concept's declared axis,
/// or a `{"data": ..., "axes": [...]}` object naming its own axes — the same
/// two shapes `reference_data`/`reference_axis_names` accept on a concept
/// entry itself.
pub fn apply_inputs(concept_repo: &mut ConceptRepo, inputs: &Json) -> Result<()> {
    let map = inputs
        .as_object()
        .ok_or_else(|| Error::Repo("inputs JSON must be an object".into()))?;
    for (name, value) in map {
        match value.as_object().filter(|obj| obj.contains_key("data")) {
            Some(obj) => {
                let data = obj.get("data").cloned().unwrap_or(Json::Null);
                let axes = obj.get("axes").and_then(Json::as_array).map(|axes| {
                    axes.iter()
                        .filter_map(Json::as_str)
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                });
                concept_repo.add_reference(name, data, axes)?;
            }
            None => {
                concept_repo.add_reference(name, value.clone(), None)?;
            }
        }
    }
    Ok(())
}

/// Loads a concept/inference repo pair from their declarative JSON files,
/// optionally seeding it with an `inputs.json` file.
pub fn load_repositories(
    concepts_path: &Path,
    inferences_path: &Path,
    inputs_path: Option<&Path>,
) -> Result<(ConceptRepo, InferenceRepo)> {
    let concepts_json = read_json_file(concepts_path)?;
    let inferences_json = read_json_file(inferences_path)?;
    load_repositories_from_json(&concepts_json, &inferences_json, inputs_path.map(read_json_file).transpose()?.as_ref())
}

/// As [`load_repositories`], but taking already-parsed JSON values. Useful
/// for embedding applications that load their repo files by some other means.
pub fn load_repositories_from_json(
    concepts_json: &Json,
    inferences_json: &Json,
    inputs_json: Option<&Json>,
) -> Result<(ConceptRepo, InferenceRepo)> {
    let all_names = concept_names(concepts_json)?;
    let produced = produced_concept_names(inferences_json)?;
    let final_names: HashSet<String> = all_names.difference(&produced).cloned().collect();

    let mut concept_repo = ConceptRepo::from_json_list(concepts_json, &final_names)?;
    let inference_repo = InferenceRepo::from_json_list(inferences_json, &mut concept_repo)?;

    if let Some(inputs) = inputs_json {
        apply_inputs(&mut concept_repo, inputs)?;
    }

    Ok((concept_repo, inference_repo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> (Json, Json) {
        let concepts = json!([
            {"concept_name": "a", "type": "semantical", "context": "c", "axis_name": "row"},
            {"concept_name": "sum", "type": "semantical", "context": "c", "axis_name": "row"},
        ]);
        let inferences = json!([
            {
                "concept_to_infer": "sum",
                "value_concepts": ["a"],
                "context_concepts": [],
                "inference_sequence": "simple",
                "flow_info": {"flow_index": "1"},
            },
        ]);
        (concepts, inferences)
    }

    #[test]
    fn final_names_are_derived_from_the_inference_complement() {
        let (concepts, inferences) = sample();
        let (concept_repo, _) = load_repositories_from_json(&concepts, &inferences, None).unwrap();
        assert!(!concept_repo.get_concept("a").unwrap().is_final);
        assert!(concept_repo.get_concept("sum").unwrap().is_final);
    }

    #[test]
    fn apply_inputs_seeds_a_raw_value_onto_the_declared_axis() {
        let (concepts, inferences) = sample();
        let inputs = json!({"a": ["2"]});
        let (concept_repo, _) = load_repositories_from_json(&concepts, &inferences, Some(&inputs)).unwrap();
        let entry = concept_repo.get_concept("a").unwrap();
        assert!(entry.is_ground);
        assert_eq!(entry.reference.as_ref().unwrap().axes, vec!["row".to_string()]);
    }

    #[test]
    fn apply_inputs_honors_an_explicit_data_axes_object() {
        let (concepts, inferences) = sample();
        let inputs = json!({"a": {"data": ["2", "3"], "axes": ["row"]}});
        let (concept_repo, _) = load_repositories_from_json(&concepts, &inferences, Some(&inputs)).unwrap();
        let entry = concept_repo.get_concept("a").unwrap();
        assert!(entry.is_ground);
        assert_eq!(entry.reference.as_ref().unwrap().axes, vec!["row".to_string()]);
    }

    #[test]
    fn apply_inputs_rejects_an_unknown_concept() {
        let (concepts, inferences) = sample();
        let inputs = json!({"nope": ["2"]});
        let err = load_repositories_from_json(&concepts, &inferences, Some(&inputs)).unwrap_err();
        assert!(matches!(err, Error::Repo(_)));
    }
}
