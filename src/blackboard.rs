//! The Blackboard: authoritative runtime state shared across a single run.
//!
//! Every status transition, identity registration, and stored result goes
//! through a named mutator so the Orchestrator's cycle loop has one place to
//! reason about "what happened this cycle". Identity aliases are resolved
//! eagerly on every read (`canonical_name`) rather than lazily compressed, to
//! keep status queries trivially correct even under concurrent reads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::reference::Reference;

/// Status of a concept's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptStatus {
    /// No reference has been produced yet.
    Empty,
    /// An inference producing this concept is currently running.
    InProgress,
    /// A reference has been produced (or supplied as ground input).
    Complete,
}

/// Status of a scheduled item (one inference attempt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting on inputs or not yet attempted this cycle.
    Pending,
    /// Currently executing.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an unrecoverable error.
    Failed,
}

/// Free-form detail recorded alongside a completed item (`"success"`,
/// `"condition_not_met"`, ...).
pub type CompletionDetail = String;

/// A judgement sequence's published boolean-mask output, consumed by `@if`/`@if!`
/// Timing gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruthMask {
    /// The boolean tensor reference.
    pub reference: Reference,
    /// Axes of the tensor, duplicated here for quick access without touching `reference`.
    pub axes: Vec<String>,
    /// The primary "for-each" axis a downstream Timer filters along.
    pub filter_axis: String,
}

/// A serializable point-in-time copy of every field on [`Blackboard`],
/// persisted verbatim by [`crate::checkpoint::CheckpointManager`] (spec
/// §4.9 "Snapshot content").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlackboardSnapshot {
    pub concept_statuses: HashMap<String, ConceptStatus>,
    pub item_statuses: HashMap<String, ItemStatus>,
    pub item_execution_counts: HashMap<String, u64>,
    pub item_completion_details: HashMap<String, CompletionDetail>,
    pub item_results: HashMap<String, serde_json::Value>,
    pub completed_concept_timestamps: HashMap<String, u64>,
    pub next_completion_ordinal: u64,
    pub concept_to_flow_index: HashMap<String, String>,
    pub identity_aliases: HashMap<String, String>,
    pub truth_masks: HashMap<String, TruthMask>,
}

/// Authoritative runtime state for a single run.
#[derive(Debug, Default)]
pub struct Blackboard {
    concept_statuses: HashMap<String, ConceptStatus>,
    item_statuses: HashMap<String, ItemStatus>,
    item_execution_counts: HashMap<String, u64>,
    item_completion_details: HashMap<String, CompletionDetail>,
    item_results: HashMap<String, serde_json::Value>,
    completed_concept_timestamps: HashMap<String, u64>,
    next_completion_ordinal: u64,
    concept_to_flow_index: HashMap<String, String>,
    identity_aliases: HashMap<String, String>,
    truth_masks: HashMap<String, TruthMask>,
}

impl Blackboard {
    /// Builds an empty blackboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `name` through the identity-alias chain to its canonical name.
    /// Idempotent: resolving a canonical name returns it unchanged.
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        let mut hops = 0;
        while let Some(next) = self.identity_aliases.get(current) {
            if next == current || hops > self.identity_aliases.len() {
                break;
            }
            current = next;
            hops += 1;
        }
        current
    }

    /// Registers that `alias` shares identity with `canonical`: status and
    /// reference queries/updates against either name are forwarded to
    /// `canonical`. Idempotent and transitive.
    pub fn register_identity(&mut self, canonical: &str, alias: &str) {
        let root = self.canonical_name(canonical).to_string();
        self.identity_aliases.insert(alias.to_string(), root);
    }

    /// Sets a concept's status, assigning the next completion ordinal when
    /// transitioning to [`ConceptStatus::Complete`] for the first time.
    pub fn set_concept_status(&mut self, name: &str, status: ConceptStatus) {
        let canonical = self.canonical_name(name).to_string();
        if status == ConceptStatus::Complete && !self.completed_concept_timestamps.contains_key(&canonical) {
            let ordinal = self.next_completion_ordinal;
            self.next_completion_ordinal += 1;
            self.completed_concept_timestamps.insert(canonical.clone(), ordinal);
        }
        self.concept_statuses.insert(canonical, status);
    }

    /// Reads a concept's status (through aliases); absent concepts are `Empty`.
    pub fn concept_status(&self, name: &str) -> ConceptStatus {
        let canonical = self.canonical_name(name);
        self.concept_statuses.get(canonical).copied().unwrap_or(ConceptStatus::Empty)
    }

    /// The monotonically assigned completion ordinal for a concept, if it has
    /// completed. Used by `@after` timing comparisons.
    pub fn completion_ordinal(&self, name: &str) -> Option<u64> {
        let canonical = self.canonical_name(name);
        self.completed_concept_timestamps.get(canonical).copied()
    }

    /// Sets an item's status.
    pub fn set_item_status(&mut self, flow_index: &str, status: ItemStatus) {
        self.item_statuses.insert(flow_index.to_string(), status);
    }

    /// Reads an item's status; absent items are `Pending`.
    pub fn item_status(&self, flow_index: &str) -> ItemStatus {
        self.item_statuses.get(flow_index).copied().unwrap_or(ItemStatus::Pending)
    }

    /// Increments and returns the execution (attempt) count for an item.
    pub fn record_attempt(&mut self, flow_index: &str) -> u64 {
        let count = self.item_execution_counts.entry(flow_index.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Number of attempts made on an item so far.
    pub fn execution_count(&self, flow_index: &str) -> u64 {
        self.item_execution_counts.get(flow_index).copied().unwrap_or(0)
    }

    /// Records a free-form completion detail for an item.
    pub fn set_completion_detail(&mut self, flow_index: &str, detail: impl Into<CompletionDetail>) {
        self.item_completion_details.insert(flow_index.to_string(), detail.into());
    }

    /// Reads an item's completion detail, if one was recorded.
    pub fn completion_detail(&self, flow_index: &str) -> Option<&str> {
        self.item_completion_details.get(flow_index).map(String::as_str)
    }

    /// Stores an opaque result payload for an item (used by Timing and
    /// other sequences whose "result" isn't a Reference).
    pub fn store_result(&mut self, flow_index: &str, result: serde_json::Value) {
        self.item_results.insert(flow_index.to_string(), result);
    }

    /// Reads an item's stored result payload.
    pub fn result(&self, flow_index: &str) -> Option<&serde_json::Value> {
        self.item_results.get(flow_index)
    }

    /// Publishes a truth mask for `concept_name`, overwriting any prior entry.
    pub fn set_truth_mask(&mut self, concept_name: &str, mask: TruthMask) {
        let canonical = self.canonical_name(concept_name).to_string();
        self.truth_masks.insert(canonical, mask);
    }

    /// Reads the truth mask published for a concept, if any.
    pub fn truth_mask(&self, concept_name: &str) -> Option<&TruthMask> {
        let canonical = self.canonical_name(concept_name);
        self.truth_masks.get(canonical)
    }

    /// Records the flow index that produces a concept (reverse lookup mirror
    /// of `InferenceRepo::flow_index_for_concept`, kept here so the
    /// blackboard alone can answer "who produces X" during Timing evaluation).
    pub fn set_concept_flow_index(&mut self, concept_name: &str, flow_index: &str) {
        self.concept_to_flow_index.insert(concept_name.to_string(), flow_index.to_string());
    }

    /// Reads the flow index that produces a concept, if recorded.
    pub fn concept_flow_index(&self, concept_name: &str) -> Option<&str> {
        self.concept_to_flow_index.get(concept_name).map(String::as_str)
    }

    /// Directly sets an item's attempt counter, bypassing the usual
    /// increment-by-one of [`Blackboard::record_attempt`]. Used only by
    /// checkpoint reconciliation to restore a prior run's count verbatim.
    pub fn set_execution_count(&mut self, flow_index: &str, count: u64) {
        self.item_execution_counts.insert(flow_index.to_string(), count);
    }

    /// Packages every field into a serializable snapshot for checkpointing.
    pub fn snapshot(&self) -> BlackboardSnapshot {
        BlackboardSnapshot {
            concept_statuses: self.concept_statuses.clone(),
            item_statuses: self.item_statuses.clone(),
            item_execution_counts: self.item_execution_counts.clone(),
            item_completion_details: self.item_completion_details.clone(),
            item_results: self.item_results.clone(),
            completed_concept_timestamps: self.completed_concept_timestamps.clone(),
            next_completion_ordinal: self.next_completion_ordinal,
            concept_to_flow_index: self.concept_to_flow_index.clone(),
            identity_aliases: self.identity_aliases.clone(),
            truth_masks: self.truth_masks.clone(),
        }
    }

    /// Restores the same-run bookkeeping fields (identity aliases, the
    /// concept→flow-index reverse map, truth masks, completion timestamps and
    /// the completion-ordinal counter) from a prior snapshot of the same run.
    ///
    /// Deliberately excludes `concept_statuses`/`item_statuses`/etc., which
    /// `checkpoint::CheckpointManager::reconcile` restores separately under
    /// the run's configured [`crate::config::ReconciliationMode`] — these
    /// fields have no per-entry signature to gate on, so a resumed run always
    /// restores them wholesale, and a forked run (a new run identity) never
    /// does.
    pub fn restore_bookkeeping(&mut self, snapshot: &BlackboardSnapshot) {
        self.identity_aliases = snapshot.identity_aliases.clone();
        self.concept_to_flow_index = snapshot.concept_to_flow_index.clone();
        self.truth_masks = snapshot.truth_masks.clone();
        self.completed_concept_timestamps = snapshot.completed_concept_timestamps.clone();
        self.next_completion_ordinal = snapshot.next_completion_ordinal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_alias_shares_status() {
        let mut bb = Blackboard::new();
        bb.register_identity("canonical", "alias");
        bb.set_concept_status("alias", ConceptStatus::Complete);
        assert_eq!(bb.concept_status("canonical"), ConceptStatus::Complete);
        assert_eq!(bb.concept_status("alias"), ConceptStatus::Complete);
    }

    #[test]
    fn completion_ordinals_are_monotonic_and_assigned_once() {
        let mut bb = Blackboard::new();
        bb.set_concept_status("a", ConceptStatus::Complete);
        bb.set_concept_status("b", ConceptStatus::Complete);
        let oa = bb.completion_ordinal("a").unwrap();
        let ob = bb.completion_ordinal("b").unwrap();
        assert!(oa < ob);
        bb.set_concept_status("a", ConceptStatus::Complete);
        assert_eq!(bb.completion_ordinal("a"), Some(oa));
    }

    #[test]
    fn transitive_identity_resolves_to_root() {
        let mut bb = Blackboard::new();
        bb.register_identity("root", "mid");
        bb.register_identity("mid", "leaf");
        assert_eq!(bb.canonical_name("leaf"), "root");
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut bb = Blackboard::new();
        bb.register_identity("root", "alias");
        bb.set_concept_status("root", ConceptStatus::Complete);
        bb.set_item_status("1.2", ItemStatus::Completed);
        bb.record_attempt("1.2");
        let snapshot = bb.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: BlackboardSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.identity_aliases.get("alias"), Some(&"root".to_string()));
        assert_eq!(restored.item_statuses.get("1.2"), Some(&ItemStatus::Completed));
    }

    #[test]
    fn restore_bookkeeping_does_not_touch_item_or_concept_status() {
        let mut source = Blackboard::new();
        source.register_identity("root", "alias");
        source.set_concept_status("root", ConceptStatus::Complete);
        source.set_item_status("1", ItemStatus::Completed);
        let snapshot = source.snapshot();

        let mut fresh = Blackboard::new();
        fresh.restore_bookkeeping(&snapshot);
        assert_eq!(fresh.canonical_name("alias"), "root");
        assert_eq!(fresh.concept_status("root"), ConceptStatus::Empty, "status is reconciled separately");
        assert_eq!(fresh.item_status("1"), ItemStatus::Pending, "status is reconciled separately");
    }
}
