//! The per-sequence `States` container threaded through a sequence's steps
//! (spec §4.5 "Step return semantics", §9 "Dynamic dispatch").
//!
//! The original splits this into one dataclass per sequence family
//! (`BaseStates`, `QuantifyingStates`, `TimingStates`, ...). This crate keeps
//! one struct with fields relevant to every family; unused fields simply stay
//! at their default for sequences that don't touch them, which reads closer
//! to how the teacher's own per-cycle state structs are shaped than a
//! from-scratch enum-of-variants would.

use std::sync::Arc;

use serde_json::Value as Json;

use crate::reference::Reference;

/// Signature of a value MFP hands to TVA (spec §4.8).
pub type Callable = Arc<dyn Fn(&Json) -> crate::error::Result<Vec<Json>> + Send + Sync>;

/// Whether a step chain finished this cycle or needs another pass (loop not
/// yet exhausted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionStatus {
    /// Nothing left to do; OWI should mark the item complete.
    #[default]
    Done,
    /// A quantifying/looping inference has more base elements to visit.
    NeedsRetry,
}

/// Per-cycle working state for one inference's step chain.
#[derive(Default)]
pub struct States {
    /// Flow index of the inference this chain is running for.
    pub flow_index: String,
    /// `value_concepts`, in the declared `value_order` (IWI/MVP).
    pub value_refs: Vec<(String, Reference)>,
    /// `context_concepts`, unordered passive inputs.
    pub context_refs: Vec<(String, Reference)>,
    /// Function concept's reference, when the sequence declares one.
    pub function_ref: Option<Reference>,
    /// MFP's produced callable, applied per MVP input cell by TVA.
    pub callable: Option<Callable>,
    /// MVP's cross-product of ordered/selected value references.
    pub combined_inputs: Option<Reference>,
    /// TVA's raw output, before TIP/TIA/MIA wrapping.
    pub raw_output: Option<Reference>,
    /// The reference this chain will publish on `concept_to_infer` (OR).
    pub produced: Option<Reference>,
    /// Judgement's boolean-mask output, published to the Blackboard as a
    /// `TruthMask` by OR.
    pub truth_mask: Option<Reference>,
    /// Timing: true once `timing_ready` resolves `@after`/`@if`/`@if!`.
    pub timing_ready: bool,
    /// Timing/quantifying: true if this pass should be treated as a
    /// no-op/skip rather than a real execution.
    pub to_be_skipped: bool,
    /// Grouping's group-identity axis key for this inference's iteration
    /// (empty for an ungrouped loop).
    pub loop_group_key: Vec<usize>,
    /// Quantifying/looping: the concept whose elements drive iteration.
    pub loop_base_concept: Option<String>,
    /// OWI's verdict: done or needs another cycle.
    pub completion_status: CompletionStatus,
    /// Completion detail OWI should record (`"success"`, `"condition_not_met"`, ...).
    pub completion_detail: Option<String>,
}

impl States {
    /// Builds an empty working state for `flow_index`.
    pub fn new(flow_index: impl Into<String>) -> Self {
        Self { flow_index: flow_index.into(), ..Self::default() }
    }
}
