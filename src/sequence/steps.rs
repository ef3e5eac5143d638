//! Step implementations (spec §4.5's step table), one function per code.

use std::sync::Arc;

use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::inference::InferenceEntry;
use crate::paradigm::{self, Paradigm};
use crate::reference::{cross_action, cross_product, element_action, is_skip, skip_json, FunctionGrid, Reference};
use crate::syntax::{AssignMarker, Assigner, CarryOverMode, Derelation, GroupMarker, Grouper, Looper, Timer, TimingCondition};

use super::runner::SequenceEnv;
use super::states::{CompletionStatus, States};

/// Input Working Interpretation: extracts the small set of declarative hints
/// later steps need directly off `working_interpretation`.
pub fn iwi(entry: &InferenceEntry, _env: &mut SequenceEnv<'_>, states: &mut States) -> Result<()> {
    if let Some(name) = entry.working_interpretation.get("loop_base_concept").and_then(Json::as_str) {
        states.loop_base_concept = Some(name.to_string());
    }
    Ok(())
}

/// Input References: loads value/context/function concept references,
/// applying any filters Timing injected for this flow index.
pub fn ir(entry: &InferenceEntry, env: &mut SequenceEnv<'_>, states: &mut States) -> Result<()> {
    let filters = env.workspace.take_filters(&entry.flow_info.flow_index);

    for name in &entry.value_concepts {
        let mut reference = env
            .concept_repo
            .get_concept(name)
            .and_then(|c| c.reference.clone())
            .ok_or_else(|| Error::Repo(format!("concept '{name}' has no reference yet")))?;
        for filter in &filters {
            reference = apply_filter(&reference, filter)?;
        }
        states.value_refs.push((name.clone(), reference));
    }

    for name in &entry.context_concepts {
        if let Some(reference) = env.concept_repo.get_concept(name).and_then(|c| c.reference.clone()) {
            states.context_refs.push((name.clone(), reference));
        }
    }

    if let Some(name) = &entry.function_concept {
        states.function_ref = env.concept_repo.get_concept(name).and_then(|c| c.reference.clone());
    }

    Ok(())
}

fn apply_filter(reference: &Reference, filter: &crate::workspace::FilterSpec) -> Result<Reference> {
    let Some(axis_pos) = reference.axes.iter().position(|a| a == &filter.filter_axis) else {
        return Ok(reference.clone());
    };
    let total: usize = reference.shape.iter().product();
    if total == 0 {
        return Ok(reference.clone());
    }
    let mut out = reference.clone();
    let mut idx = vec![0usize; reference.shape.len()];
    loop {
        let keep = filter.keep.get(idx[axis_pos]).copied().unwrap_or(true);
        if !keep {
            out.set_full(&idx, skip_json())?;
        }
        let mut carry = true;
        for d in (0..idx.len()).rev() {
            if carry {
                idx[d] += 1;
                if idx[d] >= reference.shape[d] {
                    idx[d] = 0;
                } else {
                    carry = false;
                }
            }
        }
        if carry {
            break;
        }
    }
    Ok(out)
}

/// Model Function Perception: builds the callable TVA will apply per value
/// combination, either by loading and wrapping a paradigm or by resolving a
/// literal built-in operator off the function concept.
pub fn mfp(entry: &InferenceEntry, env: &mut SequenceEnv<'_>, states: &mut States) -> Result<()> {
    if let Some(paradigm_name) = entry.working_interpretation.get("paradigm").and_then(Json::as_str) {
        let registry = env.paradigm_registry.clone().ok_or_else(|| Error::Sequence {
            flow_index: entry.flow_info.flow_index.clone(),
            message: "paradigm-driven MFP requires a configured affordance registry".to_string(),
            source: None,
        })?;
        let paradigm_dir = env.config.paradigm_dir.clone().ok_or_else(|| Error::Config("paradigm_dir is required for paradigm-driven sequences".into()))?;
        let loaded = Arc::new(Paradigm::load(std::path::Path::new(&paradigm_dir), paradigm_name)?);
        states.callable = Some(paradigm::paradigm_callable(loaded, registry));
        return Ok(());
    }

    let operator = states
        .function_ref
        .as_ref()
        .and_then(|r| r.get_tensor(true).as_array().and_then(|a| a.first()).and_then(Json::as_str).map(str::to_string))
        .or_else(|| entry.working_interpretation.get("operator").and_then(Json::as_str).map(str::to_string))
        .ok_or_else(|| Error::Sequence {
            flow_index: entry.flow_info.flow_index.clone(),
            message: "MFP requires either a 'paradigm' name or a function concept/operator".to_string(),
            source: None,
        })?;
    states.callable = Some(paradigm::builtin_operator_callable(&operator)?);
    Ok(())
}

/// Memory Value Perception: orders value references per `value_order`, then
/// cross-products them into the combined input reference TVA applies the
/// callable against.
pub fn mvp(entry: &InferenceEntry, _env: &mut SequenceEnv<'_>, states: &mut States) -> Result<()> {
    let order = entry.working_interpretation.get("value_order").and_then(Json::as_object);
    let mut ordered = states.value_refs.clone();
    if let Some(order) = order {
        ordered.sort_by_key(|(name, _)| order.get(name).and_then(Json::as_u64).unwrap_or(u64::MAX));
    }
    let refs: Vec<&Reference> = ordered.iter().map(|(_, r)| r).collect();
    states.combined_inputs = if refs.is_empty() { None } else { Some(cross_product(&refs)?) };
    Ok(())
}

/// Tool Value Actuation: applies MFP's callable to every MVP-produced cell.
pub fn tva(env: &mut SequenceEnv<'_>, states: &mut States) -> Result<()> {
    let Some(combined) = states.combined_inputs.clone() else {
        states.raw_output = None;
        return Ok(());
    };
    let callable = states.callable.clone().ok_or_else(|| Error::Sequence {
        flow_index: states.flow_index.clone(),
        message: "TVA requires MFP's callable".to_string(),
        source: None,
    })?;
    let mut grid = FunctionGrid::new(vec![], vec![]);
    grid.set(&[], callable);
    states.raw_output = Some(cross_action(&grid, &combined, "output", env.config.dev_mode)?);
    Ok(())
}

fn as_f64(v: &Json) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn evaluate_condition(op: &str, cell: &Json, expected: Option<&Json>) -> bool {
    if is_skip(cell) {
        return false;
    }
    match op {
        "equals" => expected.map(|e| cell == e).unwrap_or(false),
        "not_equals" => expected.map(|e| cell != e).unwrap_or(true),
        "gt" => as_f64(cell).zip(expected.and_then(as_f64)).map(|(a, b)| a > b).unwrap_or(false),
        "lt" => as_f64(cell).zip(expected.and_then(as_f64)).map(|(a, b)| a < b).unwrap_or(false),
        "gte" => as_f64(cell).zip(expected.and_then(as_f64)).map(|(a, b)| a >= b).unwrap_or(false),
        "lte" => as_f64(cell).zip(expected.and_then(as_f64)).map(|(a, b)| a <= b).unwrap_or(false),
        _ => !matches!(cell, Json::Null),
    }
}

/// Tool Inference Perception: for a declared `condition`, compares TVA's
/// output against it and publishes a boolean-mask reference (judgement);
/// otherwise a no-op passthrough (plain imperative).
pub fn tip(entry: &InferenceEntry, states: &mut States) -> Result<()> {
    let Some(raw) = states.raw_output.clone() else { return Ok(()) };
    let Some(condition) = entry.working_interpretation.get("condition") else { return Ok(()) };
    let op = condition.get("op").and_then(Json::as_str).unwrap_or("not_empty").to_string();
    let expected = condition.get("value").cloned();
    let mask = element_action(
        &|cells, _| Ok(Json::String(format!("%{{truth value}}({})", evaluate_condition(&op, &cells[0], expected.as_ref())))),
        &[&raw],
        false,
        false,
    )?;
    states.truth_mask = Some(mask);
    Ok(())
}

fn fold_bool(value: &Json, mode: &str, acc: &mut Option<bool>) {
    match value {
        Json::Array(items) => {
            for item in items {
                fold_bool(item, mode, acc);
            }
        }
        Json::Bool(b) => {
            *acc = Some(match (*acc, mode) {
                (None, _) => *b,
                (Some(a), "or") => a || *b,
                (Some(a), _) => a && *b,
            });
        }
        _ => {}
    }
}

/// Truth Inference Assertion: the in-composition hierarchical collapse — the
/// leaf-level boolean mask is folded (AND by default, OR when declared) down
/// to a per-group (or fully scalar) truth value. In-composition sequences run
/// no MIA after TIA, so this publishes the collapsed reference to `produced`
/// directly; its cells are already normcode-shaped (`%{truth value}(...)`),
/// which is what MIA's own wrapping would have produced anyway.
pub fn tia(entry: &InferenceEntry, states: &mut States) -> Result<()> {
    let Some(raw) = states.raw_output.clone() else { return Ok(()) };
    let condition = entry.working_interpretation.get("condition");
    let op = condition.and_then(|c| c.get("op")).and_then(Json::as_str).unwrap_or("not_empty").to_string();
    let expected = condition.and_then(|c| c.get("value")).cloned();
    let mode = entry.working_interpretation.get("collapse").and_then(Json::as_str).unwrap_or("and").to_string();
    let collapse_axis = entry.working_interpretation.get("collapse_axis").and_then(Json::as_str).map(str::to_string);

    let leaf_mask = element_action(&|cells, _| Ok(Json::Bool(evaluate_condition(&op, &cells[0], expected.as_ref()))), &[&raw], false, false)?;

    let collapsed = match collapse_axis.filter(|axis| leaf_mask.axes.contains(axis)) {
        Some(axis) => {
            let sliced = leaf_mask.slice(&[axis.as_str()])?;
            let extent = sliced.shape.first().copied().unwrap_or(0);
            let mut cells = Vec::with_capacity(extent);
            for i in 0..extent {
                let mut acc = None;
                fold_bool(&sliced.get_full(&[i]), &mode, &mut acc);
                cells.push(Json::String(format!("%{{truth value}}({})", acc.unwrap_or(mode != "or"))));
            }
            Reference::from_data(Json::Array(cells), Some(vec![axis]))?
        }
        None => {
            let mut acc = None;
            fold_bool(&leaf_mask.data, &mode, &mut acc);
            let literal = format!("%{{truth value}}({})", acc.unwrap_or(mode != "or"));
            Reference::from_data(Json::Array(vec![Json::String(literal)]), Some(vec!["_none_axis".to_string()]))?
        }
    };
    states.produced = Some(collapsed);
    Ok(())
}

fn wrap_normcode(cell: &Json) -> Json {
    match cell {
        Json::String(s) if s.starts_with('%') => cell.clone(),
        Json::String(s) => Json::String(format!("%({s})")),
        other => Json::String(format!("%({other})")),
    }
}

/// Memory Inference Actuation: wraps every cell of whichever of
/// `truth_mask`/`raw_output` is set in the normcode `%(…)` marker.
pub fn mia(states: &mut States) -> Result<()> {
    let source = states.truth_mask.take().or_else(|| states.raw_output.clone());
    let Some(source) = source else { return Ok(()) };
    states.produced = Some(element_action(&|cells, _| Ok(wrap_normcode(&cells[0])), &[&source], false, false)?);
    Ok(())
}

fn group_marker(entry: &InferenceEntry) -> Result<GroupMarker> {
    match entry.working_interpretation.get("marker").and_then(Json::as_str).unwrap_or("and_in") {
        "and_in" => Ok(GroupMarker::AndIn),
        "or_across" => Ok(GroupMarker::OrAcross),
        other => Err(Error::Repo(format!("unknown group marker '{other}'"))),
    }
}

fn working_axes(entry: &InferenceEntry, key: &str) -> Vec<String> {
    entry
        .working_interpretation
        .get(key)
        .and_then(Json::as_array)
        .map(|a| a.iter().filter_map(Json::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Grouping References: invokes the Grouper over the declared `by_axes`.
pub fn gr(entry: &InferenceEntry, states: &mut States) -> Result<()> {
    let marker = group_marker(entry)?;
    let by_axes = working_axes(entry, "by_axes");
    let by_axes_ref: Vec<&str> = by_axes.iter().map(String::as_str).collect();
    let refs: Vec<&Reference> = states.value_refs.iter().map(|(_, r)| r).collect();
    states.produced = Some(Grouper::group(marker, &refs, &by_axes_ref)?);
    Ok(())
}

/// Quantifying References: advances the loop one base element per cycle,
/// aggregating `operator` over each element's group content, and combines
/// every iteration's result once all elements have been visited.
pub fn qr(entry: &InferenceEntry, env: &mut SequenceEnv<'_>, states: &mut States) -> Result<()> {
    let grouped = states.produced.clone().ok_or_else(|| Error::Sequence {
        flow_index: entry.flow_info.flow_index.clone(),
        message: "QR requires GR's grouped reference".to_string(),
        source: None,
    })?;
    let group_axis = grouped.axes.first().cloned().unwrap_or_else(|| "group".to_string());
    let extent = grouped.shape.first().copied().unwrap_or(0);
    let elements: Vec<Json> = (0..extent).map(|i| grouped.get_full(&[i])).collect();
    let in_loop_name = entry.working_interpretation.get("in_loop_concept").and_then(Json::as_str).unwrap_or("result").to_string();
    let operator = entry.working_interpretation.get("operator").and_then(Json::as_str).unwrap_or("mean").to_string();
    let group_key = states.loop_group_key.clone();
    let flow_index = entry.flow_info.flow_index.clone();

    if elements.is_empty() {
        states.produced = Some(Reference::new(vec![group_axis], vec![0])?);
        states.completion_status = CompletionStatus::Done;
        states.completion_detail = Some("success".to_string());
        return Ok(());
    }

    if env.workspace.loop_workspace_mut(&flow_index).check_all_base_elements_looped(&group_key, &elements) {
        let combined = env
            .workspace
            .loop_workspace_mut(&flow_index)
            .combine_all_looped_elements_by_concept(&group_key, &in_loop_name, &group_axis)?;
        states.produced = Some(combined);
        states.completion_status = CompletionStatus::Done;
        states.completion_detail = Some("success".to_string());
        return Ok(());
    }

    let next = env.workspace.loop_workspace_mut(&flow_index).retrieve_next_base_element(&group_key, &elements, None);
    if let Some((element, index)) = next {
        let callable = paradigm::builtin_operator_callable(&operator)?;
        let values = callable(&element)?;
        let result_ref = Reference::from_data(Json::Array(values), Some(vec!["_none_axis".to_string()]))?;
        let ws = env.workspace.loop_workspace_mut(&flow_index);
        ws.store_new_base_element(&group_key, index, element);
        ws.store_new_in_loop_element(&group_key, index, &in_loop_name, result_ref);
    }
    states.produced = None;
    states.completion_status = CompletionStatus::NeedsRetry;
    Ok(())
}

/// Looping References: like QR but folds an accumulator across iterations
/// via carry-over instead of a stateless per-element aggregate.
pub fn lr(entry: &InferenceEntry, env: &mut SequenceEnv<'_>, states: &mut States) -> Result<()> {
    let grouped = states.produced.clone().ok_or_else(|| Error::Sequence {
        flow_index: entry.flow_info.flow_index.clone(),
        message: "LR requires GR's grouped reference".to_string(),
        source: None,
    })?;
    let group_axis = grouped.axes.first().cloned().unwrap_or_else(|| "group".to_string());
    let extent = grouped.shape.first().copied().unwrap_or(0);
    let elements: Vec<Json> = (0..extent).map(|i| grouped.get_full(&[i])).collect();
    let accumulator_name = entry.working_interpretation.get("accumulator_concept").and_then(Json::as_str).unwrap_or("accumulator").to_string();
    let operator = entry.working_interpretation.get("operator").and_then(Json::as_str).unwrap_or("+").to_string();
    let initial = entry.working_interpretation.get("initial_value").cloned().unwrap_or_else(|| Json::String("0".into()));
    let initial_ref = Reference::from_data(Json::Array(vec![initial]), Some(vec!["_none_axis".to_string()]))?;
    let group_key = states.loop_group_key.clone();
    let flow_index = entry.flow_info.flow_index.clone();

    if elements.is_empty() {
        states.produced = Some(initial_ref);
        states.completion_status = CompletionStatus::Done;
        states.completion_detail = Some("success".to_string());
        return Ok(());
    }

    if env.workspace.loop_workspace_mut(&flow_index).check_all_base_elements_looped(&group_key, &elements) {
        let combined = env
            .workspace
            .loop_workspace_mut(&flow_index)
            .combine_all_looped_elements_by_concept(&group_key, &accumulator_name, &group_axis)?;
        states.produced = Some(combined);
        states.completion_status = CompletionStatus::Done;
        states.completion_detail = Some("success".to_string());
        return Ok(());
    }

    let next = env.workspace.loop_workspace_mut(&flow_index).retrieve_next_base_element(&group_key, &elements, None);
    if let Some((element, index)) = next {
        let prior = {
            let ws = env.workspace.loop_workspace(&flow_index).expect("touched above");
            Looper::retrieve_next_in_loop_element(ws, &group_key, &accumulator_name, CarryOverMode::CarryOver, index, &initial_ref)?
        };
        let mut operands = prior.get_tensor(true).as_array().cloned().unwrap_or_default();
        operands.extend(element.as_array().cloned().unwrap_or_else(|| vec![element.clone()]));
        let callable = paradigm::builtin_operator_callable(&operator)?;
        let values = callable(&Json::Array(operands))?;
        let result_ref = Reference::from_data(Json::Array(values), Some(vec!["_none_axis".to_string()]))?;
        let ws = env.workspace.loop_workspace_mut(&flow_index);
        ws.store_new_base_element(&group_key, index, element);
        ws.store_new_in_loop_element(&group_key, index, &accumulator_name, result_ref);
    }
    states.produced = None;
    states.completion_status = CompletionStatus::NeedsRetry;
    Ok(())
}

fn parse_derelation(value: Option<&Json>) -> Result<Derelation> {
    let obj = value.and_then(Json::as_object).ok_or_else(|| Error::Repo("derelation assigning requires a 'selector' object".into()))?;
    match obj.get("kind").and_then(Json::as_str).unwrap_or("index") {
        "index" => Ok(Derelation::Index(obj.get("index").and_then(Json::as_u64).unwrap_or(0) as usize)),
        "key" => Ok(Derelation::Key(obj.get("key").and_then(Json::as_str).unwrap_or_default().to_string())),
        "unpack" => Ok(Derelation::Unpack),
        "unpack_before_selection" => Ok(Derelation::UnpackBeforeSelection(Box::new(parse_derelation(obj.get("inner"))?))),
        other => Err(Error::Repo(format!("unknown derelation selector kind '{other}'"))),
    }
}

/// Assigning References: dispatches one of the five assigning markers.
pub fn ar(entry: &InferenceEntry, env: &mut SequenceEnv<'_>, states: &mut States) -> Result<()> {
    let marker_str = entry.working_interpretation.get("marker").and_then(Json::as_str).unwrap_or("=");
    let marker = AssignMarker::parse(marker_str)?;
    match marker {
        AssignMarker::Identity => {
            let alias = entry
                .working_interpretation
                .get("alias")
                .and_then(Json::as_str)
                .ok_or_else(|| Error::Repo("identity assigning requires an 'alias'".into()))?;
            let canonical = entry.concept_to_infer.as_deref().unwrap_or(alias);
            Assigner::identity(env.blackboard, canonical, alias);
        }
        AssignMarker::Abstraction => {
            let face_value = entry
                .working_interpretation
                .get("face_value")
                .cloned()
                .ok_or_else(|| Error::Repo("abstraction assigning requires a 'face_value'".into()))?;
            let axis_names = entry.working_interpretation.get("axis_names").and_then(Json::as_array).map(|a| {
                a.iter().filter_map(Json::as_str).map(str::to_string).collect()
            });
            states.produced = Some(Assigner::abstraction(&face_value, axis_names)?);
        }
        AssignMarker::Specification => {
            let refs: Vec<&Reference> = states.value_refs.iter().map(|(_, r)| r).collect();
            let destination = entry
                .concept_to_infer
                .as_deref()
                .and_then(|name| env.concept_repo.get_concept(name))
                .and_then(|c| c.reference.as_ref());
            states.produced = Some(Assigner::specification(&refs, destination)?);
        }
        AssignMarker::Continuation => {
            let (_, dest_ref) = states
                .value_refs
                .first()
                .ok_or_else(|| Error::Repo("continuation assigning requires a destination value concept".into()))?;
            let (_, source_ref) = states
                .value_refs
                .get(1)
                .ok_or_else(|| Error::Repo("continuation assigning requires a source value concept".into()))?;
            let by_axes = working_axes(entry, "by_axes");
            let by_axes_ref: Vec<&str> = by_axes.iter().map(String::as_str).collect();
            states.produced = Some(Assigner::continuation(dest_ref, source_ref, &by_axes_ref)?);
        }
        AssignMarker::Derelation => {
            let (_, source_ref) = states
                .value_refs
                .first()
                .ok_or_else(|| Error::Repo("derelation assigning requires a source value concept".into()))?;
            let selector = parse_derelation(entry.working_interpretation.get("selector"))?;
            states.produced = Some(Assigner::derelation(&selector, source_ref, env.config.dev_mode)?);
        }
    }
    Ok(())
}

/// Timing: evaluates the condition, updates readiness/skip, and injects a
/// filter for the parent's next IR pass when a truth mask is available.
pub fn t(entry: &InferenceEntry, env: &mut SequenceEnv<'_>, states: &mut States) -> Result<()> {
    let raw = entry
        .working_interpretation
        .get("condition")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::Repo("timing inference requires a 'condition' string".into()))?;
    let condition = TimingCondition::parse(raw)?;
    let outcome = Timer::evaluate(&condition, env.blackboard);
    states.timing_ready = outcome.ready;
    states.to_be_skipped = outcome.to_be_skipped;

    if !outcome.ready {
        states.completion_status = CompletionStatus::NeedsRetry;
        return Ok(());
    }

    if !outcome.to_be_skipped {
        if let Some(parent) = entry.flow_info.parent() {
            if let Some(spec) = Timer::filter_spec_for(&condition, env.blackboard) {
                env.workspace.inject_filter(&parent, spec);
            }
        }
    }
    states.completion_status = CompletionStatus::Done;
    states.completion_detail = Some(if outcome.to_be_skipped { "condition_not_met".to_string() } else { "success".to_string() });
    Ok(())
}

fn unwrap_normcode(cell: &Json) -> Json {
    match cell {
        Json::String(s) => match s.strip_prefix("%(").and_then(|rest| rest.strip_suffix(')')) {
            Some(inner) => Json::String(inner.to_string()),
            None => cell.clone(),
        },
        other => other.clone(),
    }
}

/// Output Reference: publishes the produced reference to `concept_to_infer`,
/// stripping the MIA normcode wrapper, and registers a truth mask on the
/// Blackboard when this chain declared a judgement condition.
pub fn or(entry: &InferenceEntry, env: &mut SequenceEnv<'_>, states: &mut States) -> Result<()> {
    let Some(name) = &entry.concept_to_infer else { return Ok(()) };
    let Some(produced) = states.produced.clone() else { return Ok(()) };
    let unwrapped = element_action(&|cells, _| Ok(unwrap_normcode(&cells[0])), &[&produced], false, false)?;
    env.concept_repo.set_reference(name, unwrapped.clone())?;
    env.blackboard.set_concept_flow_index(name, &entry.flow_info.flow_index);

    if entry.working_interpretation.contains_key("condition") {
        let filter_axis = entry
            .working_interpretation
            .get("filter_axis")
            .and_then(Json::as_str)
            .map(str::to_string)
            .or_else(|| unwrapped.axes.first().cloned())
            .unwrap_or_else(|| "_none_axis".to_string());
        env.blackboard.set_truth_mask(
            name,
            crate::blackboard::TruthMask { reference: unwrapped.clone(), axes: unwrapped.axes.clone(), filter_axis },
        );
    }
    Ok(())
}

/// Output Working Interpretation: finalizes the completion detail the runner
/// reports for this cycle.
pub fn owi(states: &mut States) -> Result<()> {
    if !states.to_be_skipped && states.completion_detail.is_none() && matches!(states.completion_status, CompletionStatus::Done) {
        states.completion_detail = Some("success".to_string());
    }
    Ok(())
}
