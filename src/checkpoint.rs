//! The CheckpointManager: SQLite-backed persistence for a run's execution
//! history and point-in-time state snapshots (spec §4.9).
//!
//! Schema and reconciliation are deliberately kept out of the Orchestrator's
//! cycle loop: this module only knows how to serialize/deserialize state and
//! apply one of the three reconciliation policies to an already-constructed
//! [`Blackboard`]/[`ConceptRepo`] pair. The Orchestrator decides *when* to
//! call it (after a cycle, on suspension, on resume/fork).

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blackboard::{Blackboard, BlackboardSnapshot, ConceptStatus, ItemStatus};
use crate::concept::ConceptRepo;
use crate::config::ReconciliationMode;
use crate::error::Result;
use crate::inference::InferenceRepo;
use crate::reference::Reference;

/// Checkpoint-specific failure modes that don't already have a crate-wide
/// variant. Routine I/O/(de)serialization failures surface directly as
/// [`crate::error::Error::Sqlite`]/[`crate::error::Error::Json`] instead of
/// being wrapped here a second time.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CheckpointError {
    /// No checkpoint row exists for the requested run.
    #[error("no checkpoint found for run '{run_id}'")]
    NotFound {
        /// The run identifier that was queried.
        run_id: String,
    },
    /// The on-disk schema could not be brought to the current version.
    #[error("checkpoint schema migration failed: {0}")]
    Migration(String),
}

/// Current schema version this build of the manager expects. Bumped whenever
/// the table layout changes; `migrate` walks a database at any older version
/// forward one step at a time.
const CURRENT_SCHEMA_VERSION: i64 = 2;

/// A serialized point-in-time copy of everything reconciliation needs: the
/// Blackboard's bookkeeping, every concept with data, and the signatures
/// recorded at snapshot time (spec §4.9 "Snapshot content").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Run this snapshot belongs to.
    pub run_id: String,
    /// Cycle number at snapshot time.
    pub cycle: u64,
    /// Running count of inferences executed so far this run, the second half
    /// of a checkpoint row's composite key.
    pub inference_count: u64,
    /// Full Blackboard snapshot.
    pub blackboard: BlackboardSnapshot,
    /// Every concept reference that had data at snapshot time, keyed by
    /// concept name.
    pub concept_references: HashMap<String, Reference>,
    /// Declarative signature of every concept with data, at snapshot time.
    pub concept_signatures: HashMap<String, String>,
    /// Declarative signature of every `completed` item, at snapshot time.
    pub item_signatures: HashMap<String, String>,
}

/// SQLite-backed store for execution history and checkpoint snapshots.
pub struct CheckpointManager {
    conn: Connection,
}

impl CheckpointManager {
    /// Opens (creating if absent) the checkpoint database at `db_path` and
    /// brings its schema up to [`CURRENT_SCHEMA_VERSION`].
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let manager = Self { conn };
        manager.migrate()?;
        Ok(manager)
    }

    /// Opens an in-memory database, useful for tests and short-lived runs
    /// that don't need durability across process restarts.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let manager = Self { conn };
        manager.migrate()?;
        Ok(manager)
    }

    fn schema_version(&self) -> Result<i64> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER NOT NULL);",
        )?;
        let version: Option<i64> = self
            .conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(version.unwrap_or(0))
    }

    /// Applies every migration between the database's current version and
    /// [`CURRENT_SCHEMA_VERSION`], idempotently. A fresh database goes
    /// straight from 0 to current; a database created by an older build walks
    /// forward one version at a time (spec §4.9 "Migration rules").
    fn migrate(&self) -> Result<()> {
        let mut version = self.schema_version()?;
        if version == 0 {
            self.migrate_to_v1()?;
            version = 1;
            self.record_schema_version(version)?;
        }
        if version == 1 {
            self.migrate_v1_to_v2()?;
            version = 2;
            self.record_schema_version(version)?;
        }
        if version != CURRENT_SCHEMA_VERSION {
            return Err(CheckpointError::Migration(format!(
                "database at unexpected schema version {version}, expected {CURRENT_SCHEMA_VERSION}"
            ))
            .into());
        }
        Ok(())
    }

    fn record_schema_version(&self, version: i64) -> Result<()> {
        self.conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", params![version])?;
        Ok(())
    }

    /// v0 → v1: the legacy layout, before `run_id`/`inference_count` existed
    /// on every table. Every table in this fresh implementation is created
    /// with those columns already present, so this step is a no-op on a new
    /// database and only exists to give `migrate_v1_to_v2` something to act
    /// on when opening a database a pre-v2 build actually created.
    fn migrate_to_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle INTEGER NOT NULL,
                flow_index TEXT NOT NULL,
                inference_type TEXT NOT NULL,
                status TEXT NOT NULL,
                concept_inferred TEXT,
                timestamp INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id INTEGER NOT NULL,
                log_content TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS checkpoints (
                cycle INTEGER NOT NULL,
                state_json TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                PRIMARY KEY (cycle)
            );
            CREATE TABLE IF NOT EXISTS run_metadata (
                metadata_json TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// v1 → v2: add `run_id` to every table (defaulting existing rows to
    /// `"default"`) and `inference_count` to `checkpoints`. `checkpoints`'
    /// primary key grows from `(cycle)` to `(run_id, cycle, inference_count)`,
    /// which SQLite cannot express via `ALTER TABLE`, so that table is
    /// recreated and repopulated instead.
    fn migrate_v1_to_v2(&self) -> Result<()> {
        let has_run_id = self
            .conn
            .prepare("SELECT run_id FROM executions LIMIT 1")
            .is_ok();
        if has_run_id {
            return Ok(());
        }

        self.conn.execute_batch(
            "ALTER TABLE executions ADD COLUMN run_id TEXT NOT NULL DEFAULT 'default';
             ALTER TABLE logs ADD COLUMN run_id TEXT NOT NULL DEFAULT 'default';
             ALTER TABLE run_metadata ADD COLUMN run_id TEXT NOT NULL DEFAULT 'default';

             CREATE TABLE checkpoints_v2 (
                 run_id TEXT NOT NULL DEFAULT 'default',
                 cycle INTEGER NOT NULL,
                 inference_count INTEGER NOT NULL DEFAULT 0,
                 state_json TEXT NOT NULL,
                 timestamp INTEGER NOT NULL,
                 PRIMARY KEY (run_id, cycle, inference_count)
             );
             INSERT INTO checkpoints_v2 (run_id, cycle, inference_count, state_json, timestamp)
                 SELECT 'default', cycle, 0, state_json, timestamp FROM checkpoints;
             DROP TABLE checkpoints;
             ALTER TABLE checkpoints_v2 RENAME TO checkpoints;",
        )?;
        Ok(())
    }

    /// Records one execution attempt, returning its row id for a subsequent
    /// [`CheckpointManager::append_log`].
    pub fn record_execution(
        &self,
        run_id: &str,
        cycle: u64,
        flow_index: &str,
        inference_type: &str,
        status: &str,
        concept_inferred: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO executions (run_id, cycle, flow_index, inference_type, status, concept_inferred, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![run_id, cycle as i64, flow_index, inference_type, status, concept_inferred, now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Appends a log line against a previously recorded execution.
    pub fn append_log(&self, execution_id: i64, log_content: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO logs (execution_id, log_content) VALUES (?1, ?2)",
            params![execution_id, log_content],
        )?;
        Ok(())
    }

    /// Writes (or overwrites) a checkpoint row keyed by `(run_id, cycle,
    /// inference_count)`.
    pub fn write_checkpoint(&self, state: &CheckpointState) -> Result<()> {
        let state_json = serde_json::to_string(state)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO checkpoints (run_id, cycle, inference_count, state_json, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![state.run_id, state.cycle as i64, state.inference_count as i64, state_json, now()],
        )?;
        Ok(())
    }

    /// Loads the most recently written checkpoint for `run_id`, if any,
    /// ordered by `(cycle, inference_count)`.
    pub fn load_latest_checkpoint(&self, run_id: &str) -> Result<Option<CheckpointState>> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT state_json FROM checkpoints WHERE run_id = ?1
                 ORDER BY cycle DESC, inference_count DESC LIMIT 1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        row.map(|json| serde_json::from_str(&json).map_err(Into::into)).transpose()
    }

    /// Loads an exact `(run_id, cycle, inference_count)` checkpoint.
    pub fn load_checkpoint(&self, run_id: &str, cycle: u64, inference_count: u64) -> Result<Option<CheckpointState>> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT state_json FROM checkpoints WHERE run_id = ?1 AND cycle = ?2 AND inference_count = ?3",
                params![run_id, cycle as i64, inference_count as i64],
                |row| row.get(0),
            )
            .optional()?;
        row.map(|json| serde_json::from_str(&json).map_err(Into::into)).transpose()
    }

    /// Persists free-form metadata about a run (e.g. the repository paths or
    /// caller-supplied tags), appending a new row each call; callers read the
    /// latest via [`CheckpointManager::load_run_metadata`].
    pub fn save_run_metadata(&self, run_id: &str, metadata: &serde_json::Value) -> Result<()> {
        let metadata_json = serde_json::to_string(metadata)?;
        self.conn.execute(
            "INSERT INTO run_metadata (run_id, metadata_json, timestamp) VALUES (?1, ?2, ?3)",
            params![run_id, metadata_json, now()],
        )?;
        Ok(())
    }

    /// Loads the most recently saved metadata document for `run_id`.
    pub fn load_run_metadata(&self, run_id: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT metadata_json FROM run_metadata WHERE run_id = ?1 ORDER BY timestamp DESC LIMIT 1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        row.map(|json| serde_json::from_str(&json).map_err(Into::into)).transpose()
    }

    /// Builds a [`CheckpointState`] from the current in-memory run state,
    /// ready to hand to [`CheckpointManager::write_checkpoint`].
    pub fn snapshot_now(
        run_id: &str,
        cycle: u64,
        inference_count: u64,
        blackboard: &Blackboard,
        concept_repo: &ConceptRepo,
        inference_repo: &InferenceRepo,
    ) -> CheckpointState {
        let mut concept_references = HashMap::new();
        let mut concept_signatures = HashMap::new();
        for (name, entry) in concept_repo.get_all_concepts() {
            if let Some(reference) = &entry.reference {
                concept_references.insert(name.clone(), reference.clone());
                concept_signatures.insert(name.clone(), entry.signature.clone());
            }
        }

        let blackboard_snapshot = blackboard.snapshot();
        let mut item_signatures = HashMap::new();
        for (flow_index, status) in &blackboard_snapshot.item_statuses {
            if *status != ItemStatus::Completed {
                continue;
            }
            if let Some(entry) = inference_repo.get(flow_index) {
                item_signatures.insert(flow_index.clone(), entry.signature());
            }
        }

        CheckpointState {
            run_id: run_id.to_string(),
            cycle,
            inference_count,
            blackboard: blackboard_snapshot,
            concept_references,
            concept_signatures,
            item_signatures,
        }
    }

    /// Applies `state` to `blackboard`/`concept_repo` under `mode` (spec
    /// §4.9 "Reconciliation modes"). When `is_fork` is true, item lifecycle
    /// is never restored and same-run bookkeeping (identity aliases, truth
    /// masks, the concept→flow-index map, completion ordinals) stays at the
    /// fresh run's defaults, since a fork is a new run identity built against
    /// a repository that may not even share the same inference graph.
    pub fn reconcile(
        state: &CheckpointState,
        blackboard: &mut Blackboard,
        concept_repo: &mut ConceptRepo,
        inference_repo: &InferenceRepo,
        mode: ReconciliationMode,
        is_fork: bool,
    ) -> Result<()> {
        if !is_fork {
            blackboard.restore_bookkeeping(&state.blackboard);
        }

        for (name, checkpointed_ref) in &state.concept_references {
            let Some(entry) = concept_repo.get_concept(name) else { continue };
            let current_signature = entry.signature.clone();
            let saved_signature = state.concept_signatures.get(name);
            let apply = match mode {
                ReconciliationMode::Overwrite => true,
                ReconciliationMode::Patch => saved_signature.is_some_and(|s| *s == current_signature),
                ReconciliationMode::FillGaps => entry.reference.is_none(),
            };
            if apply {
                concept_repo.set_reference(name, checkpointed_ref.clone())?;
                blackboard.set_concept_status(name, ConceptStatus::Complete);
            }
        }

        if is_fork {
            return Ok(());
        }

        for (flow_index, saved_signature) in &state.item_signatures {
            let Some(entry) = inference_repo.get(flow_index) else { continue };
            let current_signature = entry.signature();
            let apply = match mode {
                ReconciliationMode::Overwrite => true,
                ReconciliationMode::Patch => current_signature == *saved_signature,
                ReconciliationMode::FillGaps => blackboard.item_status(flow_index) == ItemStatus::Pending,
            };
            if !apply {
                continue;
            }
            blackboard.set_item_status(flow_index, ItemStatus::Completed);
            if let Some(detail) = state.blackboard.item_completion_details.get(flow_index) {
                blackboard.set_completion_detail(flow_index, detail.clone());
            }
            if let Some(count) = state.blackboard.item_execution_counts.get(flow_index) {
                blackboard.set_execution_count(flow_index, *count);
            }
            if let Some(result) = state.blackboard.item_results.get(flow_index) {
                blackboard.store_result(flow_index, result.clone());
            }
        }
        Ok(())
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn concept_repo_with(name: &str, face_value: Option<&str>) -> ConceptRepo {
        let mut concept = serde_json::json!({"concept_name": name, "type": "semantical", "context": "c", "axis_name": "x"});
        if let Some(v) = face_value {
            concept["face_value"] = serde_json::json!(v);
            concept["reference_data"] = serde_json::json!([v]);
            concept["reference_axis_names"] = serde_json::json!(["x"]);
        }
        ConceptRepo::from_json_list(&serde_json::json!([concept]), &HashSet::new()).unwrap()
    }

    #[test]
    fn fresh_database_migrates_to_current_version() {
        let manager = CheckpointManager::open_in_memory().unwrap();
        assert_eq!(manager.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn checkpoint_round_trips() {
        let manager = CheckpointManager::open_in_memory().unwrap();
        let blackboard = Blackboard::new();
        let concept_repo = concept_repo_with("sum", Some("7"));
        let inference_repo = InferenceRepo::new();
        let state = CheckpointManager::snapshot_now("run-a", 3, 5, &blackboard, &concept_repo, &inference_repo);
        manager.write_checkpoint(&state).unwrap();

        let loaded = manager.load_latest_checkpoint("run-a").unwrap().unwrap();
        assert_eq!(loaded.cycle, 3);
        assert_eq!(loaded.inference_count, 5);
        assert_eq!(loaded.concept_references.get("sum").unwrap().get_tensor(true), serde_json::json!(["7"]));
    }

    #[test]
    fn load_latest_with_no_checkpoints_is_none() {
        let manager = CheckpointManager::open_in_memory().unwrap();
        assert!(manager.load_latest_checkpoint("nobody").unwrap().is_none());
    }

    #[test]
    fn patch_discards_value_on_signature_mismatch() {
        let old_repo = concept_repo_with("c", Some("1"));
        let blackboard = Blackboard::new();
        let inference_repo = InferenceRepo::new();
        let state = CheckpointManager::snapshot_now("r", 0, 0, &blackboard, &old_repo, &inference_repo);

        // Changing the face value changes the concept's signature, simulating an edited prompt.
        let mut new_repo = concept_repo_with("c", Some("2"));
        let mut new_bb = Blackboard::new();
        CheckpointManager::reconcile(&state, &mut new_bb, &mut new_repo, &inference_repo, ReconciliationMode::Patch, false).unwrap();

        assert_eq!(new_bb.concept_status("c"), ConceptStatus::Empty);
    }

    #[test]
    fn patch_keeps_value_on_matching_signature() {
        let repo_at_checkpoint = concept_repo_with("c", Some("1"));
        let blackboard = Blackboard::new();
        let inference_repo = InferenceRepo::new();
        let state = CheckpointManager::snapshot_now("r", 0, 0, &blackboard, &repo_at_checkpoint, &inference_repo);

        let mut new_repo = concept_repo_with("c", Some("1"));
        let mut new_bb = Blackboard::new();
        CheckpointManager::reconcile(&state, &mut new_bb, &mut new_repo, &inference_repo, ReconciliationMode::Patch, false).unwrap();

        assert_eq!(new_bb.concept_status("c"), ConceptStatus::Complete);
        assert_eq!(new_repo.get_concept("c").unwrap().reference.as_ref().unwrap().get_tensor(true), serde_json::json!(["1"]));
    }

    #[test]
    fn fork_never_restores_item_status() {
        let mut source_bb = Blackboard::new();
        source_bb.set_item_status("1", ItemStatus::Completed);
        let repo = concept_repo_with("c", Some("1"));
        let inference_repo = InferenceRepo::new();
        let state = CheckpointManager::snapshot_now("r", 0, 0, &source_bb, &repo, &inference_repo);

        let mut forked_repo = concept_repo_with("c", Some("1"));
        let mut forked_bb = Blackboard::new();
        CheckpointManager::reconcile(&state, &mut forked_bb, &mut forked_repo, &inference_repo, ReconciliationMode::Overwrite, true).unwrap();

        assert_eq!(forked_bb.item_status("1"), ItemStatus::Pending);
        assert_eq!(forked_bb.concept_status("c"), ConceptStatus::Complete, "concept values are still restored on fork");
    }

    #[test]
    fn fill_gaps_skips_concepts_that_already_have_data() {
        let checkpointed_repo = concept_repo_with("c", Some("old"));
        let blackboard = Blackboard::new();
        let inference_repo = InferenceRepo::new();
        let state = CheckpointManager::snapshot_now("r", 0, 0, &blackboard, &checkpointed_repo, &inference_repo);

        let mut live_repo = concept_repo_with("c", Some("new"));
        let mut live_bb = Blackboard::new();
        live_bb.set_concept_status("c", ConceptStatus::Complete);
        CheckpointManager::reconcile(&state, &mut live_bb, &mut live_repo, &inference_repo, ReconciliationMode::FillGaps, false).unwrap();

        assert_eq!(live_repo.get_concept("c").unwrap().reference.as_ref().unwrap().get_tensor(true), serde_json::json!(["new"]));
    }
}
