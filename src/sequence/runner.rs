//! The staged state machine: dispatches one inference's declared sequence
//! through its step list for the current cycle (spec §4.5).

use std::sync::Arc;

use crate::blackboard::Blackboard;
use crate::concept::ConceptRepo;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::inference::InferenceEntry;
use crate::paradigm::AffordanceRegistry;
use crate::workspace::Workspace;

use super::registry::{self, Step};
use super::states::{CompletionStatus, States};
use super::steps;

/// Everything a step needs beyond the `InferenceEntry` and its own `States`:
/// the shared repos, the per-run config, and the optional paradigm machinery
/// (only required by sequences that declare a `paradigm`).
pub struct SequenceEnv<'a> {
    /// The concept repo: steps read value/context/function references here
    /// and OR writes the produced reference back.
    pub concept_repo: &'a mut ConceptRepo,
    /// Blackboard: Timing reads/writes status and truth masks here.
    pub blackboard: &'a mut Blackboard,
    /// Per-cycle workspace: filter injection and the quantifying/looping arena.
    pub workspace: &'a mut Workspace,
    /// Run configuration (dev_mode, paradigm_dir, ...).
    pub config: &'a EngineConfig,
    /// Affordance registry backing paradigm-driven MFP steps, when configured.
    pub paradigm_registry: Option<Arc<AffordanceRegistry>>,
}

/// What a sequence's step chain decided for this cycle.
#[derive(Debug, Clone)]
pub enum SequenceOutcome {
    /// The item is finished; `detail` is the completion detail to record
    /// (`"success"` or `"condition_not_met"`).
    Completed {
        /// Completion detail recorded on the Blackboard.
        detail: String,
    },
    /// A quantifying/looping inference has more iterations; re-queue the item.
    NeedsRetry,
}

/// Runs `entry`'s declared sequence's step chain once.
pub fn run_cycle(entry: &InferenceEntry, env: &mut SequenceEnv<'_>) -> Result<SequenceOutcome> {
    let kind = entry.sequence_kind()?;
    let chain = registry::step_list(kind);
    let mut states = States::new(entry.flow_info.flow_index.clone());

    for step in chain {
        match step {
            Step::Iwi => steps::iwi(entry, env, &mut states)?,
            Step::Ir => steps::ir(entry, env, &mut states)?,
            Step::Mfp => steps::mfp(entry, env, &mut states)?,
            Step::Mvp => steps::mvp(entry, env, &mut states)?,
            Step::Tva => steps::tva(env, &mut states)?,
            Step::Tip => steps::tip(entry, &mut states)?,
            Step::Tia => steps::tia(entry, &mut states)?,
            Step::Mia => steps::mia(&mut states)?,
            Step::Gr => steps::gr(entry, &mut states)?,
            Step::Qr => steps::qr(entry, env, &mut states)?,
            Step::Lr => steps::lr(entry, env, &mut states)?,
            Step::Ar => steps::ar(entry, env, &mut states)?,
            Step::T => steps::t(entry, env, &mut states)?,
            Step::Or => steps::or(entry, env, &mut states)?,
            Step::Owi => steps::owi(&mut states)?,
        }
        if states.to_be_skipped {
            break;
        }
    }

    if states.to_be_skipped {
        return Ok(SequenceOutcome::Completed { detail: "condition_not_met".to_string() });
    }
    match states.completion_status {
        CompletionStatus::NeedsRetry => Ok(SequenceOutcome::NeedsRetry),
        CompletionStatus::Done => Ok(SequenceOutcome::Completed {
            detail: states.completion_detail.unwrap_or_else(|| "success".to_string()),
        }),
    }
}
