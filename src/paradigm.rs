//! Paradigm / ModelSequenceRunner (spec §4.8).
//!
//! A paradigm is a declarative file naming a short sequence of tool
//! "affordance" invocations whose final result becomes a callable the
//! sequence runner's MFP step hands to TVA. The original mechanism evaluates
//! inline code strings per affordance; this crate has no safe equivalent for
//! that and instead resolves affordances against a statically compiled
//! [`AffordanceRegistry`] keyed by `(tool, affordance)` name pairs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{Error, Result};

/// Supplied by the embedding application: the actual model-calling affordance.
/// This crate defines the trait and a deterministic test double, not a
/// network client.
pub trait ModelClient: Send + Sync {
    /// Produces a model response for a rendered prompt and call parameters.
    fn generate(&self, rendered_prompt: &Json, params: &Json) -> Result<Json>;
}

/// Deterministic in-memory model client: echoes the rendered prompt back as
/// the response. Useful for tests and for embedding applications that have
/// not yet wired a real model.
#[derive(Debug, Default)]
pub struct EchoModelClient;

impl ModelClient for EchoModelClient {
    fn generate(&self, rendered_prompt: &Json, _params: &Json) -> Result<Json> {
        Ok(rendered_prompt.clone())
    }
}

/// One step of a paradigm's sequence spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Execution order; steps run sorted by this field, not by list order.
    pub step_index: u32,
    /// Tool name to resolve the affordance against.
    pub tool: String,
    /// Affordance name on that tool.
    pub affordance: String,
    /// Call parameters, each either a literal, a `MetaValue`, or an `AffordanceValue`.
    #[serde(default)]
    pub params: serde_json::Map<String, Json>,
    /// Meta-dict key the affordance's result is stored under.
    pub result_key: String,
}

/// A paradigm's ordered sequence of steps.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SequenceSpec {
    /// The steps, in declaration order (not necessarily execution order).
    pub steps: Vec<StepSpec>,
}

/// A paradigm's environment spec: which tools it expects to be registered.
/// Carried through for documentation/validation; the registry itself is the
/// source of truth for what actually resolves.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnvSpec {
    /// Declared tool names, opaque beyond their keys.
    #[serde(default)]
    pub tools: serde_json::Map<String, Json>,
}

/// A loaded paradigm file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paradigm {
    /// Paradigm name, matching its file stem.
    pub name: String,
    /// Declared environment.
    #[serde(default)]
    pub env_spec: EnvSpec,
    /// The sequence this paradigm runs to build a callable.
    pub sequence_spec: SequenceSpec,
    /// Free-form metadata carried alongside the paradigm.
    #[serde(default)]
    pub metadata: serde_json::Map<String, Json>,
}

impl Paradigm {
    /// Loads `{paradigm_dir}/{name}.json`.
    pub fn load(paradigm_dir: &Path, name: &str) -> Result<Self> {
        let path = paradigm_dir.join(format!("{name}.json"));
        let raw = std::fs::read_to_string(&path)?;
        let mut value: Json = serde_json::from_str(&raw)?;
        if let Some(obj) = value.as_object_mut() {
            obj.entry("name").or_insert_with(|| Json::String(name.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// A registered affordance implementation: takes the step's resolved
/// parameters (as a JSON object) and produces a result value.
pub type Affordance = Arc<dyn Fn(&Json) -> Result<Json> + Send + Sync>;

/// Lookup table from `(tool, affordance)` to its implementation.
#[derive(Clone, Default)]
pub struct AffordanceRegistry {
    affordances: HashMap<(String, String), Affordance>,
}

impl AffordanceRegistry {
    /// Builds an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an affordance implementation.
    pub fn register(&mut self, tool: &str, affordance: &str, f: Affordance) {
        self.affordances.insert((tool.to_string(), affordance.to_string()), f);
    }

    /// Looks up an affordance by tool and name.
    pub fn get(&self, tool: &str, affordance: &str) -> Option<&Affordance> {
        self.affordances.get(&(tool.to_string(), affordance.to_string()))
    }

    /// A registry pre-populated with the built-in `model` tool's affordances
    /// (`render_template`, `generate`), backed by `client`.
    pub fn with_model_client(client: Arc<dyn ModelClient>) -> Self {
        let mut registry = Self::new();
        registry.register(
            "model",
            "render_template",
            Arc::new(|params: &Json| {
                Ok(serde_json::json!({
                    "template": params.get("template").cloned().unwrap_or(Json::Null),
                    "input": params.get("input").cloned().unwrap_or(Json::Null),
                }))
            }),
        );
        let for_generate = Arc::clone(&client);
        registry.register(
            "model",
            "generate",
            Arc::new(move |params: &Json| {
                let rendered = params.get("rendered").cloned().unwrap_or(Json::Null);
                for_generate.generate(&rendered, params)
            }),
        );
        registry
    }
}

/// Resolves and executes a paradigm's sequence against a registry.
pub struct ModelSequenceRunner;

impl ModelSequenceRunner {
    /// Runs every step of `sequence`, sorted by `step_index`, threading a
    /// meta-dict seeded with `initial_meta` through `MetaValue` resolution.
    /// Returns the final meta-dict.
    pub fn run(
        sequence: &SequenceSpec,
        registry: &AffordanceRegistry,
        initial_meta: serde_json::Map<String, Json>,
    ) -> Result<serde_json::Map<String, Json>> {
        let mut steps = sequence.steps.clone();
        steps.sort_by_key(|s| s.step_index);
        let mut meta = initial_meta;
        for step in &steps {
            let resolved = Self::resolve_params(&step.params, &meta)?;
            let affordance = registry.get(&step.tool, &step.affordance).ok_or_else(|| Error::Sequence {
                flow_index: String::new(),
                message: format!("unknown affordance '{}.{}'", step.tool, step.affordance),
                source: None,
            })?;
            let result = affordance(&Json::Object(resolved))?;
            meta.insert(step.result_key.clone(), result);
        }
        Ok(meta)
    }

    fn resolve_params(
        params: &serde_json::Map<String, Json>,
        meta: &serde_json::Map<String, Json>,
    ) -> Result<serde_json::Map<String, Json>> {
        let mut out = serde_json::Map::with_capacity(params.len());
        for (k, v) in params {
            out.insert(k.clone(), Self::resolve_value(v, meta)?);
        }
        Ok(out)
    }

    fn resolve_value(value: &Json, meta: &serde_json::Map<String, Json>) -> Result<Json> {
        match value {
            Json::Object(obj) if obj.get("__type__") == Some(&Json::String("MetaValue".into())) => {
                let key = obj.get("key").and_then(Json::as_str).unwrap_or_default();
                Ok(meta.get(key).cloned().unwrap_or(Json::Null))
            }
            Json::Object(obj) if obj.get("__type__") == Some(&Json::String("AffordanceValue".into())) => {
                let name = obj.get("name").and_then(Json::as_str).unwrap_or_default();
                Ok(Json::String(format!("@affordance:{name}")))
            }
            Json::Object(obj) => {
                let mut out = serde_json::Map::with_capacity(obj.len());
                for (k, v) in obj {
                    out.insert(k.clone(), Self::resolve_value(v, meta)?);
                }
                Ok(Json::Object(out))
            }
            Json::Array(items) => Ok(Json::Array(
                items.iter().map(|v| Self::resolve_value(v, meta)).collect::<Result<Vec<_>>>()?,
            )),
            other => Ok(other.clone()),
        }
    }
}

/// Signature MFP hands to TVA: given one MVP-produced input cell, produce the
/// values for that cell's output (a `FunctionGrid` cell, spec §4.1).
pub type ModelCallable = Arc<dyn Fn(&Json) -> Result<Vec<Json>> + Send + Sync>;

/// Builds the MFP callable that runs `paradigm` once per invocation, seeding
/// its meta-dict with the call's input under the `"input"` key and returning
/// the value stored by the sequence's last step.
pub fn paradigm_callable(paradigm: Arc<Paradigm>, registry: Arc<AffordanceRegistry>) -> ModelCallable {
    Arc::new(move |input: &Json| -> Result<Vec<Json>> {
        let mut meta = serde_json::Map::new();
        meta.insert("input".to_string(), input.clone());
        let result_meta = ModelSequenceRunner::run(&paradigm.sequence_spec, &registry, meta)?;
        let last_key = paradigm
            .sequence_spec
            .steps
            .iter()
            .max_by_key(|s| s.step_index)
            .map(|s| s.result_key.clone())
            .unwrap_or_default();
        Ok(vec![result_meta.get(&last_key).cloned().unwrap_or(Json::Null)])
    })
}

/// Builds a callable for one of the small closed set of built-in function
/// concepts (`+`, `-`, `*`, `mean`, `max`, `min`, `concat`, `count`), used
/// when a function concept's face value names an operator directly rather
/// than a paradigm (spec Scenario 1's addition pipeline).
pub fn builtin_operator_callable(operator: &str) -> Result<ModelCallable> {
    let op = operator.to_string();
    Ok(Arc::new(move |input: &Json| -> Result<Vec<Json>> {
        let items = input.as_array().cloned().unwrap_or_else(|| vec![input.clone()]);
        Ok(vec![apply_builtin(&op, &items)?])
    }))
}

fn as_f64(v: &Json) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
}

fn format_number(v: f64) -> Json {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        Json::String((v as i64).to_string())
    } else {
        Json::String(v.to_string())
    }
}

fn apply_builtin(op: &str, items: &[Json]) -> Result<Json> {
    match op {
        "+" | "sum" => Ok(format_number(items.iter().filter_map(as_f64).sum())),
        "-" => {
            let mut nums = items.iter().filter_map(as_f64);
            let first = nums.next().unwrap_or(0.0);
            Ok(format_number(nums.fold(first, |acc, v| acc - v)))
        }
        "*" | "product" => Ok(format_number(items.iter().filter_map(as_f64).product())),
        "mean" | "average" => {
            let nums: Vec<f64> = items.iter().filter_map(as_f64).collect();
            if nums.is_empty() {
                return Ok(Json::Null);
            }
            Ok(format_number(nums.iter().sum::<f64>() / nums.len() as f64))
        }
        "max" => items
            .iter()
            .filter_map(as_f64)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
            .map(format_number)
            .ok_or_else(|| Error::Combinator { message: "max over empty input".into() }),
        "min" => items
            .iter()
            .filter_map(as_f64)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
            .map(format_number)
            .ok_or_else(|| Error::Combinator { message: "min over empty input".into() }),
        "concat" => Ok(Json::String(items.iter().map(display_string).collect::<Vec<_>>().join(""))),
        "count" => Ok(Json::String(items.len().to_string())),
        other => Err(Error::Combinator { message: format!("unknown builtin operator '{other}'") }),
    }
}

fn display_string(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_addition_sums_string_encoded_numbers() {
        let callable = builtin_operator_callable("+").unwrap();
        let out = callable(&json!(["5", "2"])).unwrap();
        assert_eq!(out, vec![json!("7")]);
    }

    #[test]
    fn unknown_builtin_operator_errors() {
        assert!(builtin_operator_callable("???").is_ok());
        assert!(apply_builtin("???", &[]).is_err());
    }

    #[test]
    fn model_sequence_runner_resolves_meta_values_and_stores_results() {
        let sequence = SequenceSpec {
            steps: vec![StepSpec {
                step_index: 0,
                tool: "model".into(),
                affordance: "render_template".into(),
                params: serde_json::Map::from_iter([
                    ("template".to_string(), json!("say {x}")),
                    ("input".to_string(), json!({"__type__": "MetaValue", "key": "input"})),
                ]),
                result_key: "rendered".into(),
            }],
        };
        let registry = AffordanceRegistry::with_model_client(Arc::new(EchoModelClient));
        let mut meta = serde_json::Map::new();
        meta.insert("input".into(), json!("hello"));
        let out = ModelSequenceRunner::run(&sequence, &registry, meta).unwrap();
        assert_eq!(out.get("rendered").unwrap()["input"], json!("hello"));
    }
}
