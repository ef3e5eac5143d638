//! The recognized configuration surface (spec §6), loaded from TOML/JSON or
//! built programmatically. Unknown keys are rejected so a typo surfaces as a
//! structured [`crate::error::Error::Config`] instead of being silently ignored.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How many ready items the orchestrator executes per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunMode {
    /// Execute at most one inference per cycle; useful for deterministic
    /// single-stepping and the scenario in spec §8 that counts cycles.
    Slow,
    /// Execute every ready item per cycle.
    #[default]
    Fast,
}

/// Checkpoint reconciliation policy applied on resume or fork (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationMode {
    /// Keep a checkpointed value only if its signature still matches; discard
    /// (and mark empty) otherwise. Default for resume.
    #[default]
    Patch,
    /// Trust the checkpoint unconditionally. Default for fork.
    Overwrite,
    /// Apply a checkpointed value only where the current concept is empty.
    FillGaps,
}

/// The engine's recognized configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Name/identifier of the LLM the embedding application's `ModelClient`
    /// should use; opaque to the core.
    #[serde(default)]
    pub llm_model: Option<String>,
    /// Hard cap on orchestrator cycles before halting with `CycleCapExhausted`.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u64,
    /// Path to the checkpoint SQLite database.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Base directory repository JSON files are resolved relative to.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    /// Directory paradigm files are loaded from, when paradigm-driven
    /// sequences are used.
    #[serde(default)]
    pub paradigm_dir: Option<String>,
    /// Whether to verify that file paths referenced by concepts (script/prompt
    /// files) exist at load time.
    #[serde(default)]
    pub verify_files: bool,
    /// Orchestrator scheduling granularity.
    #[serde(default)]
    pub run_mode: RunMode,
    /// Checkpoint reconciliation policy.
    #[serde(default)]
    pub reconciliation_mode: ReconciliationMode,
    /// Process-wide combinator failure-swallowing toggle (spec §4.1).
    ///
    /// Set once at construction and threaded into every combinator call site;
    /// never mutated mid-run (spec §5).
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_max_cycles() -> u64 {
    50
}

fn default_db_path() -> String {
    "normweave.sqlite3".to_string()
}

fn default_base_dir() -> String {
    ".".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm_model: None,
            max_cycles: default_max_cycles(),
            db_path: default_db_path(),
            base_dir: default_base_dir(),
            paradigm_dir: None,
            verify_files: false,
            run_mode: RunMode::default(),
            reconciliation_mode: ReconciliationMode::default(),
            dev_mode: false,
        }
    }
}

impl EngineConfig {
    /// Parses configuration from a TOML document, rejecting unrecognized keys.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(Error::from)
    }

    /// Parses configuration from a JSON document, rejecting unrecognized keys.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(Error::from)
    }

    /// Validates cross-field invariants that `serde` alone cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.max_cycles == 0 {
            return Err(Error::Config("max_cycles must be at least 1".into()));
        }
        if self.db_path.trim().is_empty() {
            return Err(Error::Config("db_path must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let raw = r#"
            max_cycles = 10
            not_a_real_key = true
        "#;
        let err = EngineConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn zero_max_cycles_fails_validation() {
        let mut cfg = EngineConfig::default();
        cfg.max_cycles = 0;
        assert!(cfg.validate().is_err());
    }
}
