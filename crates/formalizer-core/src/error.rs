//! Core error types for formalizer-core.
//!
//! Two families live here:
//! - [`CoreError`]: concept-graph invariant violations. These indicate a logic
//!   defect and abort a run.
//! - [`CollaboratorError`]: failures of the external search, model, or
//!   compiler services. Callers recover from these locally.
//!
//! [`ConfigError`] covers rejected run configuration values.

use thiserror::Error;

use crate::id::ConceptId;
use crate::node::NodeStatus;

/// Concept-graph invariant violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A concept ID was not found in the graph.
    #[error("concept not found: ConceptId({id})", id = id.0)]
    ConceptNotFound { id: ConceptId },

    /// Inserting the dependency edge would close a cycle.
    #[error("dependency {dependent} -> {dependency} would close a cycle")]
    CycleRejected {
        dependent: ConceptId,
        dependency: ConceptId,
    },

    /// The scheduler found a cycle in a graph that should be acyclic.
    #[error("cycle detected in dependency graph involving ConceptId({id})", id = id.0)]
    CycleDetected { id: ConceptId },

    /// A status change outside the allowed lifecycle paths.
    #[error("invalid status transition for ConceptId({id}): {from} -> {to}", id = id.0)]
    InvalidTransition {
        id: ConceptId,
        from: NodeStatus,
        to: NodeStatus,
    },

    /// Another synthesis attempt was requested after the budget was spent.
    #[error("ConceptId({id}) exhausted its {max} synthesis attempt(s)", id = id.0)]
    AttemptBudgetExhausted { id: ConceptId, max: u32 },

    /// Stage 2 was requested while concepts were still pending.
    #[error("graph incomplete: {} concept(s) still pending", pending.len())]
    GraphIncomplete { pending: Vec<ConceptId> },
}

/// Recoverable failures of an external collaborator.
///
/// `collaborator` names the service ("search", "model", "compiler") so log
/// lines and diagnostics stay attributable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The service could not be reached or refused the request.
    #[error("{collaborator} unavailable: {reason}")]
    Unavailable {
        collaborator: &'static str,
        reason: String,
    },

    /// The service answered, but not in the expected shape.
    #[error("{collaborator} returned a malformed response: {reason}")]
    Malformed {
        collaborator: &'static str,
        reason: String,
    },

    /// The per-call timeout elapsed.
    #[error("{collaborator} timed out after {seconds}s")]
    Timeout {
        collaborator: &'static str,
        seconds: u64,
    },
}

impl CollaboratorError {
    pub fn unavailable(collaborator: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            collaborator,
            reason: reason.into(),
        }
    }

    pub fn malformed(collaborator: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            collaborator,
            reason: reason.into(),
        }
    }

    /// Returns the name of the collaborator that failed.
    pub fn collaborator(&self) -> &'static str {
        match self {
            Self::Unavailable { collaborator, .. }
            | Self::Malformed { collaborator, .. }
            | Self::Timeout { collaborator, .. } => collaborator,
        }
    }
}

/// A run configuration value was rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration for `{field}`: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}
