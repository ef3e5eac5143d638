//! Domain events emitted by the core and the pluggable [`EventEmitter`] that
//! receives them.
//!
//! The core never renders these events; it only emits them. Embedding
//! applications (a UI, a WebSocket layer, a log shipper — all out of scope
//! here) supply their own [`EventEmitter`] implementation to consume them.

use std::fmt;

use serde_json::{Map, Value};
use tracing::Level;

/// Free-form extra fields an event carries beyond its strongly typed ones.
pub type Extra = Map<String, Value>;

/// The closed catalog of events the core emits, mirroring spec §6.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Event {
    /// A run's repositories were parsed and validated.
    ExecutionLoaded { run_id: String, extra: Extra },
    /// The orchestrator's cycle loop began.
    ExecutionStarted { run_id: String, extra: Extra },
    /// The cycle loop suspended cooperatively (e.g. for user interaction).
    ExecutionPaused { run_id: String, cycle: u64, extra: Extra },
    /// A paused run resumed.
    ExecutionResumed { run_id: String, cycle: u64, extra: Extra },
    /// A stop request was honored.
    ExecutionStopped { run_id: String, cycle: u64, extra: Extra },
    /// The cycle loop reached a fixed point with no pending items.
    ExecutionCompleted { run_id: String, cycle: u64, extra: Extra },
    /// The cycle loop halted on an unrecoverable condition (deadlock, cap, schema error).
    ExecutionError { run_id: String, message: String, extra: Extra },
    /// Emitted once per cycle with a coarse progress snapshot.
    ExecutionProgress { run_id: String, cycle: u64, completed: usize, total: usize, extra: Extra },
    /// The run's state was fully cleared.
    ExecutionReset { run_id: String, extra: Extra },
    /// A subset of the run's state was cleared (e.g. one concept and its descendants).
    ExecutionPartialReset { run_id: String, concept_name: Option<String>, extra: Extra },
    /// An item's sequence began executing.
    InferenceStarted { flow_index: String, concept_name: Option<String>, extra: Extra },
    /// An item's sequence completed (successfully or as a condition-not-met skip).
    InferenceCompleted { flow_index: String, concept_name: Option<String>, detail: String, extra: Extra },
    /// An item's sequence raised an unrecoverable error.
    InferenceFailed { flow_index: String, message: String, extra: Extra },
    /// An item was returned to the retry list for the next cycle.
    InferenceRetry { flow_index: String, attempt: u64, extra: Extra },
    /// A breakpoint was set on a flow index.
    BreakpointSet { flow_index: String, extra: Extra },
    /// A breakpoint was cleared.
    BreakpointCleared { flow_index: String, extra: Extra },
    /// Execution paused because a set breakpoint was reached.
    BreakpointHit { flow_index: String, extra: Extra },
    /// A concept's value was manually overridden (bypassing its producing inference).
    ValueOverridden { concept_name: String, extra: Extra },
    /// A sequence step began.
    StepStarted { flow_index: String, step: String, extra: Extra },
    /// A sequence run began.
    SequenceStarted { flow_index: String, sequence: String, extra: Extra },
    /// A sequence run completed.
    SequenceCompleted { flow_index: String, sequence: String, extra: Extra },
    /// A free-form log line surfaced from within a step.
    LogEntry { flow_index: Option<String>, message: String, extra: Extra },
    /// A tool/affordance invocation began (paradigm runner).
    ToolCallStarted { flow_index: String, tool: String, affordance: String, extra: Extra },
    /// A tool/affordance invocation completed.
    ToolCallCompleted { flow_index: String, tool: String, affordance: String, extra: Extra },
}

impl Event {
    /// The event's name exactly as catalogued in spec §6 (`"inference:started"`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            Event::ExecutionLoaded { .. } => "execution:loaded",
            Event::ExecutionStarted { .. } => "execution:started",
            Event::ExecutionPaused { .. } => "execution:paused",
            Event::ExecutionResumed { .. } => "execution:resumed",
            Event::ExecutionStopped { .. } => "execution:stopped",
            Event::ExecutionCompleted { .. } => "execution:completed",
            Event::ExecutionError { .. } => "execution:error",
            Event::ExecutionProgress { .. } => "execution:progress",
            Event::ExecutionReset { .. } => "execution:reset",
            Event::ExecutionPartialReset { .. } => "execution:partial_reset",
            Event::InferenceStarted { .. } => "inference:started",
            Event::InferenceCompleted { .. } => "inference:completed",
            Event::InferenceFailed { .. } => "inference:failed",
            Event::InferenceRetry { .. } => "inference:retry",
            Event::BreakpointSet { .. } => "breakpoint:set",
            Event::BreakpointCleared { .. } => "breakpoint:cleared",
            Event::BreakpointHit { .. } => "breakpoint:hit",
            Event::ValueOverridden { .. } => "value:overridden",
            Event::StepStarted { .. } => "step:started",
            Event::SequenceStarted { .. } => "sequence:started",
            Event::SequenceCompleted { .. } => "sequence:completed",
            Event::LogEntry { .. } => "log:entry",
            Event::ToolCallStarted { .. } => "tool:call_started",
            Event::ToolCallCompleted { .. } => "tool:call_completed",
        }
    }

    /// The `tracing` level a [`TracingEventEmitter`] logs this event at.
    pub fn level(&self) -> Level {
        match self {
            Event::ExecutionError { .. } | Event::InferenceFailed { .. } => Level::ERROR,
            Event::ExecutionPaused { .. }
            | Event::InferenceRetry { .. }
            | Event::BreakpointHit { .. }
            | Event::ExecutionPartialReset { .. } => Level::WARN,
            Event::StepStarted { .. } | Event::ToolCallStarted { .. } | Event::ToolCallCompleted { .. } => {
                Level::DEBUG
            }
            _ => Level::INFO,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Receives domain events emitted by the orchestrator and sequence runner.
///
/// Implementations must not block the cycle loop for long; a UI or network
/// forwarder should hand events off to its own queue.
pub trait EventEmitter: Send + Sync {
    /// Handles one emitted event.
    fn emit(&self, event: &Event);
}

/// Default emitter: logs each event through `tracing` at [`Event::level`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventEmitter;

impl EventEmitter for TracingEventEmitter {
    fn emit(&self, event: &Event) {
        match event.level() {
            Level::ERROR => tracing::error!(target: "normweave::event", name = event.name(), ?event),
            Level::WARN => tracing::warn!(target: "normweave::event", name = event.name(), ?event),
            Level::DEBUG => tracing::debug!(target: "normweave::event", name = event.name(), ?event),
            Level::TRACE => tracing::trace!(target: "normweave::event", name = event.name(), ?event),
            Level::INFO => tracing::info!(target: "normweave::event", name = event.name(), ?event),
        }
    }
}

/// An emitter that discards every event; useful in tests and embeddings that
/// don't want any observability overhead.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventEmitter;

impl EventEmitter for NullEventEmitter {
    fn emit(&self, _event: &Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_spec_catalog() {
        let event = Event::InferenceStarted {
            flow_index: "1.2".into(),
            concept_name: Some("sum".into()),
            extra: Extra::new(),
        };
        assert_eq!(event.name(), "inference:started");
    }

    #[test]
    fn null_emitter_accepts_every_event() {
        let emitter = NullEventEmitter;
        emitter.emit(&Event::ExecutionStarted { run_id: "r".into(), extra: Extra::new() });
    }
}
