//! The per-cycle `Workspace`: transient collaboration state that does not
//! belong on the [`crate::blackboard::Blackboard`] because it is scratch data
//! consumed within the same run rather than authoritative status.
//!
//! The one use today is the filter-injection protocol (spec §4.6/§4.7): a
//! Timing step that gates on a judgement's truth mask writes a filter spec
//! here under a key scoped to the parent's flow index; the parent's IR step
//! reads and consumes (removes) that key the next time it runs.

use std::collections::HashMap;

use crate::syntax::quantifier::LoopWorkspace;

/// One filter to apply to every value reference of a gated inference: cells
/// at `filter_axis` position `index` where the mask is false become skip
/// values.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    /// Axis the mask ranges over (matches [`crate::blackboard::TruthMask::filter_axis`]).
    pub filter_axis: String,
    /// Boolean-equivalent tensor: `mask[i]` is true iff position `i` along
    /// `filter_axis` should be kept.
    pub keep: Vec<bool>,
}

/// Transient per-cycle workspace, keyed by flow index for the filter
/// protocol. Not persisted across checkpoints: on resume, any in-flight
/// Timing gate simply re-evaluates and re-injects on its next attempt.
#[derive(Debug, Default)]
pub struct Workspace {
    filters: HashMap<String, Vec<FilterSpec>>,
    loop_workspaces: HashMap<String, LoopWorkspace>,
}

impl Workspace {
    /// Builds an empty workspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter spec for `parent_flow_index` (logical AND with any
    /// already injected this cycle).
    pub fn inject_filter(&mut self, parent_flow_index: &str, spec: FilterSpec) {
        self.filters.entry(parent_flow_index.to_string()).or_default().push(spec);
    }

    /// Removes and returns every filter spec injected for `parent_flow_index`,
    /// consuming the key so it is not observed twice.
    pub fn take_filters(&mut self, parent_flow_index: &str) -> Vec<FilterSpec> {
        self.filters.remove(parent_flow_index).unwrap_or_default()
    }

    /// True if a filter is currently pending for `parent_flow_index`.
    pub fn has_filters(&self, parent_flow_index: &str) -> bool {
        self.filters.contains_key(parent_flow_index)
    }

    /// Mutable access to the quantifying/looping iteration arena for
    /// `flow_index`, creating an empty one on first access. Persists across
    /// cycles for the life of the run (quantifying and looping sequences
    /// span multiple orchestrator cycles, one iteration per cycle).
    pub fn loop_workspace_mut(&mut self, flow_index: &str) -> &mut LoopWorkspace {
        self.loop_workspaces.entry(flow_index.to_string()).or_default()
    }

    /// Read-only access to the loop workspace for `flow_index`, if any
    /// iterations have been recorded yet.
    pub fn loop_workspace(&self, flow_index: &str) -> Option<&LoopWorkspace> {
        self.loop_workspaces.get(flow_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_filters_consumes_the_key() {
        let mut ws = Workspace::new();
        ws.inject_filter("1.2", FilterSpec { filter_axis: "document".into(), keep: vec![true, false] });
        assert!(ws.has_filters("1.2"));
        let specs = ws.take_filters("1.2");
        assert_eq!(specs.len(), 1);
        assert!(!ws.has_filters("1.2"));
        assert!(ws.take_filters("1.2").is_empty());
    }

    #[test]
    fn multiple_injections_accumulate() {
        let mut ws = Workspace::new();
        ws.inject_filter("1", FilterSpec { filter_axis: "a".into(), keep: vec![true] });
        ws.inject_filter("1", FilterSpec { filter_axis: "a".into(), keep: vec![false] });
        assert_eq!(ws.take_filters("1").len(), 2);
    }
}
