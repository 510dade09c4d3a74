//! Pipeline error types.

use formalizer_core::{ConfigError, CoreError};

/// Fatal failures of a formalization run.
///
/// Collaborator failures never reach this type: the drivers absorb them into
/// node statuses. What remains is a broken graph invariant, a rejected
/// configuration, or a failure writing results.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A concept-graph invariant was violated.
    #[error("graph error: {0}")]
    Graph(#[from] CoreError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
