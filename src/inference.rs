//! Inference entries, flow indices, and the `InferenceRepo` that holds them.
//!
//! An [`InferenceEntry`] is the declarative description of one step in the
//! dependency graph: which concept it produces, which concepts feed it, and
//! which [`SequenceKind`] runs it. Flow indices encode the graph's tree shape
//! as dotted strings (`"1.2.3"` is a child step of `"1.2"`), which the
//! orchestrator and Timing syntax helper both rely on for descendant queries.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::concept::ConceptRepo;
use crate::error::{Error, Result};

/// The closed catalog of sequence variants an inference may declare.
///
/// Several names share a base variant's step list and defaults (see
/// `SequenceKind::step_list` in `sequence::registry`); they are kept distinct
/// here because the declarative repo format names them individually and
/// rejecting an unrecognized name is part of `InferenceRepo::from_json_list`'s
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    Simple,
    Imperative,
    ImperativeDirect,
    ImperativeInput,
    ImperativePython,
    ImperativePythonIndirect,
    ImperativeInComposition,
    Grouping,
    Quantifying,
    Looping,
    Assigning,
    Timing,
    Judgement,
    JudgementDirect,
    JudgementPython,
    JudgementPythonIndirect,
    JudgementInComposition,
}

impl SequenceKind {
    /// Parses a sequence name from the repo's declarative string form.
    pub fn parse(name: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(name.to_string()))
            .map_err(|_| Error::UnknownSequence(name.to_string()))
    }

    /// The declarative string name, inverse of [`SequenceKind::parse`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Imperative => "imperative",
            Self::ImperativeDirect => "imperative_direct",
            Self::ImperativeInput => "imperative_input",
            Self::ImperativePython => "imperative_python",
            Self::ImperativePythonIndirect => "imperative_python_indirect",
            Self::ImperativeInComposition => "imperative_in_composition",
            Self::Grouping => "grouping",
            Self::Quantifying => "quantifying",
            Self::Looping => "looping",
            Self::Assigning => "assigning",
            Self::Timing => "timing",
            Self::Judgement => "judgement",
            Self::JudgementDirect => "judgement_direct",
            Self::JudgementPython => "judgement_python",
            Self::JudgementPythonIndirect => "judgement_python_indirect",
            Self::JudgementInComposition => "judgement_in_composition",
        }
    }

    /// True for `timing`, the one sequence kind that never produces a concept
    /// (it only gates its parent's readiness).
    pub fn is_timing(&self) -> bool {
        matches!(self, Self::Timing)
    }
}

/// Dotted tree position of an inference, e.g. `"1.2.3"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowInfo {
    /// The dotted flow index string.
    pub flow_index: String,
}

impl FlowInfo {
    /// Splits the flow index into its dot-separated integer components.
    pub fn components(&self) -> Result<Vec<u64>> {
        self.flow_index
            .split('.')
            .map(|part| part.parse::<u64>().map_err(|_| Error::Repo(format!("malformed flow index '{}'", self.flow_index))))
            .collect()
    }

    /// The flow index of this index's direct parent, if any (`"1.2.3"` → `Some("1.2")`).
    pub fn parent(&self) -> Option<String> {
        self.flow_index.rfind('.').map(|pos| self.flow_index[..pos].to_string())
    }

    /// True if `other` is a descendant of (or equal to) `self` in the flow tree.
    pub fn is_ancestor_of(&self, other: &str) -> bool {
        other == self.flow_index || other.starts_with(&format!("{}.", self.flow_index))
    }
}

/// Declarative description of one inference step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceEntry {
    /// Name of the concept this inference produces (absent for `timing` entries).
    #[serde(default)]
    pub concept_to_infer: Option<String>,
    /// Ordered positional input concepts.
    #[serde(default)]
    pub value_concepts: Vec<String>,
    /// Passive input concepts consumed by quantifying/looping/grouping.
    #[serde(default)]
    pub context_concepts: Vec<String>,
    /// Concept supplying a functional spec, for sequences that take one.
    #[serde(default)]
    pub function_concept: Option<String>,
    /// Sequence-specific configuration blob (value ordering, selectors, syntax
    /// markers, paradigm name, timing condition, ...).
    #[serde(default)]
    pub working_interpretation: serde_json::Map<String, serde_json::Value>,
    /// Which sequence variant executes this inference.
    pub inference_sequence: String,
    /// Dotted position in the flow tree.
    pub flow_info: FlowInfo,
}

impl InferenceEntry {
    /// Parses and validates [`InferenceEntry::inference_sequence`].
    pub fn sequence_kind(&self) -> Result<SequenceKind> {
        SequenceKind::parse(&self.inference_sequence)
    }

    /// Computes this entry's stable signature over every declarative field,
    /// including `working_interpretation`.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"inference\0");
        hasher.update(self.concept_to_infer.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\0");
        for v in &self.value_concepts {
            hasher.update(v.as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"\0");
        for v in &self.context_concepts {
            hasher.update(v.as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"\0");
        hasher.update(self.function_concept.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\0");
        hasher.update(self.inference_sequence.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.flow_info.flow_index.as_bytes());
        hasher.update(b"\0");
        let canonical = serde_json::to_string(&self.working_interpretation).unwrap_or_default();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Read-mostly mapping from flow index to its [`InferenceEntry`].
#[derive(Debug, Clone, Default)]
pub struct InferenceRepo {
    entries: HashMap<String, InferenceEntry>,
    /// Reverse lookup, populated at load time.
    concept_to_flow_index: HashMap<String, String>,
}

impl InferenceRepo {
    /// Builds an empty repo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a repo from a declarative JSON list of inference entries,
    /// resolving concept references against `concept_repo` and rejecting
    /// unknown sequence names.
    pub fn from_json_list(json: &serde_json::Value, concept_repo: &mut ConceptRepo) -> Result<Self> {
        let list = json
            .as_array()
            .ok_or_else(|| Error::Repo("inference repo JSON must be a list".into()))?;
        let mut entries = HashMap::with_capacity(list.len());
        let mut concept_to_flow_index = HashMap::new();

        for item in list {
            let entry: InferenceEntry = serde_json::from_value(item.clone())?;
            entry.sequence_kind()?;

            if entries.contains_key(&entry.flow_info.flow_index) {
                return Err(Error::Repo(format!("duplicate flow index '{}'", entry.flow_info.flow_index)));
            }

            let mut referenced = Vec::new();
            if let Some(c) = &entry.concept_to_infer {
                referenced.push(c.clone());
                concept_to_flow_index.insert(c.clone(), entry.flow_info.flow_index.clone());
            }
            referenced.extend(entry.value_concepts.iter().cloned());
            referenced.extend(entry.context_concepts.iter().cloned());
            if let Some(c) = &entry.function_concept {
                referenced.push(c.clone());
            }
            for name in &referenced {
                concept_repo.mark_used_at(name, &entry.flow_info.flow_index)?;
            }

            entries.insert(entry.flow_info.flow_index.clone(), entry);
        }

        Ok(Self {
            entries,
            concept_to_flow_index,
        })
    }

    /// Looks up an entry by flow index.
    pub fn get(&self, flow_index: &str) -> Option<&InferenceEntry> {
        self.entries.get(flow_index)
    }

    /// Iterates over every entry, keyed by flow index.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &InferenceEntry)> {
        self.entries.iter()
    }

    /// The flow index of the inference that produces `concept_name`, if any.
    pub fn flow_index_for_concept(&self, concept_name: &str) -> Option<&str> {
        self.concept_to_flow_index.get(concept_name).map(String::as_str)
    }

    /// Every flow index that is a direct child of `parent_flow_index` (one
    /// dot deeper, immediate descendants only).
    pub fn direct_children(&self, parent_flow_index: &str) -> Vec<&str> {
        let prefix = format!("{parent_flow_index}.");
        self.entries
            .keys()
            .filter(|flow_index| {
                flow_index
                    .strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('.'))
            })
            .map(String::as_str)
            .collect()
    }

    /// Every timing inference whose flow index is a direct child of
    /// `parent_flow_index`, i.e. the set of Timing gates guarding this inference.
    pub fn timing_children(&self, parent_flow_index: &str) -> Vec<&str> {
        self.direct_children(parent_flow_index)
            .into_iter()
            .filter(|flow_index| {
                self.entries
                    .get(*flow_index)
                    .map(|e| matches!(e.sequence_kind(), Ok(k) if k.is_timing()))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Number of entries in the repo.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the repo holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every flow index known to the repo.
    pub fn flow_indices(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flow_info_ancestor_check() {
        let parent = FlowInfo { flow_index: "1.2".into() };
        assert!(parent.is_ancestor_of("1.2"));
        assert!(parent.is_ancestor_of("1.2.3"));
        assert!(!parent.is_ancestor_of("1.20"));
        assert!(!parent.is_ancestor_of("1.3"));
    }

    #[test]
    fn unknown_sequence_is_rejected() {
        let mut concept_repo = ConceptRepo::new();
        let data = json!([{
            "concept_to_infer": "a",
            "value_concepts": [],
            "context_concepts": [],
            "inference_sequence": "not_a_real_sequence",
            "flow_info": {"flow_index": "1"},
        }]);
        let err = InferenceRepo::from_json_list(&data, &mut concept_repo).unwrap_err();
        assert!(matches!(err, Error::UnknownSequence(_)));
    }

    #[test]
    fn signature_changes_with_working_interpretation() {
        let mut entry = InferenceEntry {
            concept_to_infer: Some("a".into()),
            value_concepts: vec![],
            context_concepts: vec![],
            function_concept: None,
            working_interpretation: serde_json::Map::new(),
            inference_sequence: "simple".into(),
            flow_info: FlowInfo { flow_index: "1".into() },
        };
        let sig1 = entry.signature();
        entry.working_interpretation.insert("k".into(), json!("v"));
        assert_ne!(sig1, entry.signature());
    }
}
