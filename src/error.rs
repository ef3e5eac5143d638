//! Crate-wide error and result types.
//!
//! All fallible operations in this crate return [`Result`]. Variants are grouped
//! roughly by the subsystem that raises them; see each variant's doc comment for
//! when it is produced and how callers are expected to react.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The payload carried by a [`Error::NeedsUserInteraction`] condition.
///
/// This is the one error variant that must never be swallowed by dev-mode
/// combinator error suppression: it always propagates to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRequest {
    /// Opaque identifier the embedding application uses to correlate a response
    /// with this request.
    pub interaction_id: String,
    /// Human-readable prompt describing what input is required.
    pub prompt: String,
    /// Free-form parameters the requesting tool wants surfaced alongside the prompt.
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl InteractionRequest {
    /// Builds a new interaction request with an empty `kwargs` map.
    pub fn new(interaction_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            interaction_id: interaction_id.into(),
            prompt: prompt.into(),
            kwargs: serde_json::Map::new(),
        }
    }
}

/// The crate-wide error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A combinator's callable failed. With dev mode off this is caught at the
    /// combinator boundary and degraded to a skip cell; with dev mode on it
    /// propagates to the caller as this variant.
    #[error("combinator callable failed: {message}")]
    Combinator {
        /// Description of the failure, usually the inner callable's own error text.
        message: String,
    },

    /// A step requires input that is not yet available. Always propagates
    /// regardless of dev mode.
    #[error("needs user interaction: {0.prompt}")]
    NeedsUserInteraction(InteractionRequest),

    /// A sequence step raised an error unrelated to user interaction. The item
    /// that triggered it is marked `failed`; the cycle continues with other items.
    #[error("sequence step failed for item {flow_index}: {message}")]
    Sequence {
        /// Flow index of the failing item.
        flow_index: String,
        /// Human-readable description of the failure.
        message: String,
        /// Underlying error, when one is available.
        #[source]
        source: Option<Box<Error>>,
    },

    /// No item made progress in a cycle and none are in-progress.
    #[error("no progress made in cycle {cycle}; halting")]
    Deadlock {
        /// The cycle number at which the deadlock was detected.
        cycle: u64,
    },

    /// `max_cycles` was reached while items remain pending.
    #[error("cycle cap ({max_cycles}) exhausted with {pending_count} item(s) still pending")]
    CycleCapExhausted {
        /// Configured cycle cap.
        max_cycles: u64,
        /// Number of items still pending when the cap was hit.
        pending_count: usize,
    },

    /// A reference operation was asked to combine axes or shapes that cannot
    /// be reconciled (e.g. mismatched extents on a shared axis).
    #[error("reference shape error: {0}")]
    Shape(String),

    /// An inference or concept repo failed to load or validate.
    #[error("repository error: {0}")]
    Repo(String),

    /// The declared `inference_sequence` name is not in the closed catalog.
    #[error("unknown inference sequence: {0}")]
    UnknownSequence(String),

    /// An unrecognized or malformed configuration key was supplied.
    #[error("configuration error: {0}")]
    Config(String),

    /// A checkpoint could not be read, written, or migrated.
    #[error(transparent)]
    Checkpoint(#[from] crate::checkpoint::CheckpointError),

    /// Wrapped filesystem I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wrapped JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Wrapped SQLite error.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// Wrapped TOML deserialization error (configuration loading).
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// True if this error is a [`Error::NeedsUserInteraction`] condition, the one
    /// variant combinators must never degrade to a skip value.
    pub fn is_needs_user_interaction(&self) -> bool {
        matches!(self, Error::NeedsUserInteraction(_))
    }

    /// Builds a [`Error::Sequence`] wrapping an arbitrary source error.
    pub fn sequence(
        flow_index: impl Into<String>,
        message: impl Into<String>,
        source: Option<Error>,
    ) -> Self {
        Error::Sequence {
            flow_index: flow_index.into(),
            message: message.into(),
            source: source.map(Box::new),
        }
    }
}
