//! Concepts and the `ConceptRepo` that holds them.
//!
//! A [`Concept`] is the typed symbolic node of the graph: a name, a type drawn
//! from a closed vocabulary, a context tag, an axis name for its reference, and
//! (once populated) a [`Reference`]. Concepts are loaded once per run from a
//! declarative JSON list and are otherwise read-mostly; the mutable half of a
//! concept's lifecycle (its reference, its ground/final status) lives on the
//! [`ConceptEntry`] wrapper inside [`ConceptRepo`].

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::reference::Reference;

/// Closed vocabulary of concept kinds, classifying how a concept participates
/// in sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptType {
    /// Structural concept manipulated by Syntax helpers (grouping, looping, ...).
    Syntactical,
    /// Concept carrying model-facing meaning (a judgement, a generated value, ...).
    Semantical,
    /// Concept that exists purely to drive inference scheduling (a timer gate, ...).
    Inferential,
}

/// Declarative description of a concept, as loaded from the repo's JSON list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    /// Globally unique concept name.
    pub concept_name: String,
    /// Kind of concept.
    #[serde(rename = "type")]
    pub concept_type: ConceptType,
    /// Free-form context tag (e.g. which paradigm or subsystem owns this concept).
    pub context: String,
    /// Axis name used when a reference is attached to this concept.
    pub axis_name: String,
    /// Optional script path backing a syntactical/inferential concept; folded
    /// into the signature when present.
    #[serde(default)]
    pub script_path: Option<String>,
    /// Optional prompt file path backing a semantical concept; folded into the
    /// signature when present.
    #[serde(default)]
    pub prompt_file: Option<String>,
    /// Optional literal face value used to seed an abstraction (`%` marker);
    /// folded into the signature when present.
    #[serde(default)]
    pub face_value: Option<serde_json::Value>,
    /// Optional raw tensor data seeding this concept's reference at load
    /// time. Shaped according to `reference_axis_names` (falling back to
    /// `axis_name` alone when absent), the same convention `inputs.json`
    /// uses for a `{data, axes}` entry.
    #[serde(default)]
    pub reference_data: Option<serde_json::Value>,
    /// Axis names for `reference_data`, when it needs more than the single
    /// `axis_name` axis.
    #[serde(default)]
    pub reference_axis_names: Option<Vec<String>>,
    /// Explicit override marking this concept ground regardless of whether
    /// `reference_data` is present.
    #[serde(default)]
    pub is_ground_concept: Option<bool>,
    /// Explicit override marking this concept final (nothing in the repo
    /// produces it) regardless of the derived `concept_to_infer` complement.
    #[serde(default)]
    pub is_final_concept: Option<bool>,
}

impl Concept {
    /// Computes this concept's stable signature: a SHA-256 hash over its
    /// declarative fields, hex-encoded. Two concepts with identical declarative
    /// fields always produce the same signature, independent of process or
    /// platform.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"concept\0");
        hasher.update(format!("{:?}\0", self.concept_type));
        hasher.update(self.context.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.axis_name.as_bytes());
        hasher.update(b"\0");
        if let Some(p) = &self.script_path {
            hasher.update(p.as_bytes());
        }
        hasher.update(b"\0");
        if let Some(p) = &self.prompt_file {
            hasher.update(p.as_bytes());
        }
        hasher.update(b"\0");
        if let Some(v) = &self.face_value {
            hasher.update(v.to_string().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// A concept together with its runtime-mutable state inside the repo.
#[derive(Debug, Clone)]
pub struct ConceptEntry {
    /// The declarative concept.
    pub concept: Concept,
    /// Attached reference, once one has been produced or supplied as input.
    pub reference: Option<Reference>,
    /// True once this concept has an initial reference from inputs. Stays
    /// true until an explicit [`ConceptRepo::clear_reference`] (orchestrator
    /// reset), which is the one sanctioned way to flip it back.
    pub is_ground: bool,
    /// True if this concept was declared ground at load time (via
    /// `reference_data` or `is_ground_concept`). Unlike `is_ground`, this
    /// never changes at runtime; it is what a full reset preserves.
    pub is_declared_ground: bool,
    /// True if no inference in the repo declares this concept as its
    /// `concept_to_infer`, i.e. nothing downstream can still produce it.
    pub is_final: bool,
    /// Flow indices of every inference that references this concept (as
    /// `concept_to_infer`, a value concept, or a context concept).
    pub flow_indices: HashSet<String>,
    /// Signature at load time.
    pub signature: String,
}

/// Read-mostly mapping from concept name to its [`ConceptEntry`].
#[derive(Debug, Clone, Default)]
pub struct ConceptRepo {
    entries: HashMap<String, ConceptEntry>,
}

impl ConceptRepo {
    /// Builds an empty repo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a repo from a declarative JSON list of concepts.
    ///
    /// `final_names` identifies which concepts no inference in the repo
    /// produces (callers typically pass the complement of every
    /// `concept_to_infer` seen across the paired `InferenceRepo`).
    pub fn from_json_list(json: &serde_json::Value, final_names: &HashSet<String>) -> Result<Self> {
        let list = json
            .as_array()
            .ok_or_else(|| Error::Repo("concept repo JSON must be a list".into()))?;
        let mut entries = HashMap::with_capacity(list.len());
        for item in list {
            let concept: Concept = serde_json::from_value(item.clone())?;
            if entries.contains_key(&concept.concept_name) {
                return Err(Error::Repo(format!("duplicate concept name '{}'", concept.concept_name)));
            }
            let reference = match &concept.reference_data {
                Some(data) => {
                    let axes = concept
                        .reference_axis_names
                        .clone()
                        .unwrap_or_else(|| vec![concept.axis_name.clone()]);
                    Some(Reference::from_data(data.clone(), Some(axes))?)
                }
                None => None,
            };
            let is_ground = concept.is_ground_concept.unwrap_or(false) || reference.is_some();
            let is_final = concept.is_final_concept.unwrap_or(false) || final_names.contains(&concept.concept_name);
            let signature = concept.signature();
            entries.insert(
                concept.concept_name.clone(),
                ConceptEntry {
                    concept,
                    reference,
                    is_ground,
                    is_declared_ground: is_ground,
                    is_final,
                    flow_indices: HashSet::new(),
                    signature,
                },
            );
        }

        let declared_axes: HashSet<&str> = entries.values().map(|e| e.concept.axis_name.as_str()).collect();
        for (name, entry) in &entries {
            let Some(reference) = &entry.reference else { continue };
            for axis in &reference.axes {
                if axis != crate::reference::NONE_AXIS && !declared_axes.contains(axis.as_str()) {
                    return Err(Error::Repo(format!(
                        "concept '{name}' references undeclared axis '{axis}'"
                    )));
                }
            }
        }

        Ok(Self { entries })
    }

    /// Attaches a flow index to a concept's known usage sites. Used while
    /// resolving the paired `InferenceRepo`.
    pub fn mark_used_at(&mut self, name: &str, flow_index: &str) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::Repo(format!("unknown concept '{name}'")))?;
        entry.flow_indices.insert(flow_index.to_string());
        Ok(())
    }

    /// Creates or replaces the reference attached to `name` from raw nested
    /// JSON data, marking the concept ground.
    pub fn add_reference(&mut self, name: &str, data: serde_json::Value, axis_names: Option<Vec<String>>) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::Repo(format!("unknown concept '{name}'")))?;
        let axes = axis_names.unwrap_or_else(|| vec![entry.concept.axis_name.clone()]);
        entry.reference = Some(Reference::from_data(data, Some(axes))?);
        entry.is_ground = true;
        Ok(())
    }

    /// Attaches an already-built [`Reference`] directly, marking the concept ground.
    pub fn set_reference(&mut self, name: &str, reference: Reference) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::Repo(format!("unknown concept '{name}'")))?;
        entry.reference = Some(reference);
        entry.is_ground = true;
        Ok(())
    }

    /// Clears `name`'s reference and ground flag unconditionally. Used by the
    /// Orchestrator's partial reset to walk a produced (or overridden)
    /// concept back to genuinely empty.
    pub fn clear_reference(&mut self, name: &str) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::Repo(format!("unknown concept '{name}'")))?;
        entry.reference = None;
        entry.is_ground = false;
        Ok(())
    }

    /// Clears every concept's reference except those declared ground at load
    /// time. Used by the Orchestrator's full reset: true ground inputs
    /// survive, everything an inference produced does not.
    pub fn clear_non_ground_references(&mut self) {
        for entry in self.entries.values_mut() {
            if !entry.is_declared_ground {
                entry.reference = None;
                entry.is_ground = false;
            }
        }
    }

    /// Looks up a concept entry by name.
    pub fn get_concept(&self, name: &str) -> Option<&ConceptEntry> {
        self.entries.get(name)
    }

    /// Mutable lookup by name.
    pub fn get_concept_mut(&mut self, name: &str) -> Option<&mut ConceptEntry> {
        self.entries.get_mut(name)
    }

    /// Iterates over every concept entry.
    pub fn get_all_concepts(&self) -> impl Iterator<Item = (&String, &ConceptEntry)> {
        self.entries.iter()
    }

    /// Number of concepts in the repo.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the repo holds no concepts.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_list_rejects_duplicates() {
        let data = json!([
            {"concept_name": "a", "type": "semantical", "context": "c", "axis_name": "x"},
            {"concept_name": "a", "type": "semantical", "context": "c", "axis_name": "x"},
        ]);
        let err = ConceptRepo::from_json_list(&data, &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::Repo(_)));
    }

    #[test]
    fn from_json_list_rejects_undeclared_reference_axis() {
        let data = json!([
            {"concept_name": "a", "type": "semantical", "context": "c", "axis_name": "x",
             "reference_data": ["5"], "reference_axis_names": ["y"]},
        ]);
        let err = ConceptRepo::from_json_list(&data, &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::Repo(_)));
    }

    #[test]
    fn signature_is_stable_and_sensitive_to_context() {
        let a = Concept {
            concept_name: "a".into(),
            concept_type: ConceptType::Semantical,
            context: "ctx".into(),
            axis_name: "x".into(),
            script_path: None,
            prompt_file: None,
            face_value: None,
            reference_data: None,
            reference_axis_names: None,
            is_ground_concept: None,
            is_final_concept: None,
        };
        let mut b = a.clone();
        assert_eq!(a.signature(), b.signature());
        b.context = "other".into();
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn reference_data_seeds_a_ground_reference() {
        let data = json!([{
            "concept_name": "a", "type": "semantical", "context": "c", "axis_name": "x",
            "reference_data": ["5"], "reference_axis_names": ["x"],
        }]);
        let repo = ConceptRepo::from_json_list(&data, &HashSet::new()).unwrap();
        let entry = repo.get_concept("a").unwrap();
        assert!(entry.is_ground);
        assert!(entry.is_declared_ground);
        assert!(entry.reference.is_some());
    }

    #[test]
    fn is_ground_concept_flag_seeds_ground_status_without_reference_data() {
        let data = json!([{
            "concept_name": "a", "type": "semantical", "context": "c", "axis_name": "x",
            "is_ground_concept": true,
        }]);
        let repo = ConceptRepo::from_json_list(&data, &HashSet::new()).unwrap();
        let entry = repo.get_concept("a").unwrap();
        assert!(entry.is_ground);
        assert!(entry.is_declared_ground);
        assert!(entry.reference.is_none());
    }

    #[test]
    fn clear_non_ground_references_keeps_declared_ground_and_drops_the_rest() {
        let data = json!([
            {"concept_name": "ground", "type": "semantical", "context": "c", "axis_name": "x",
             "reference_data": ["5"], "reference_axis_names": ["x"]},
            {"concept_name": "produced", "type": "semantical", "context": "c", "axis_name": "x"},
        ]);
        let mut repo = ConceptRepo::from_json_list(&data, &HashSet::new()).unwrap();
        repo.add_reference("produced", json!(["9"]), None).unwrap();

        repo.clear_non_ground_references();

        assert!(repo.get_concept("ground").unwrap().is_ground);
        assert!(repo.get_concept("ground").unwrap().reference.is_some());
        assert!(!repo.get_concept("produced").unwrap().is_ground);
        assert!(repo.get_concept("produced").unwrap().reference.is_none());
    }

    #[test]
    fn clear_reference_rejects_unknown_concept() {
        let mut repo = ConceptRepo::new();
        assert!(repo.clear_reference("nope").is_err());
    }
}
