//! Concept nodes and their lifecycle status.
//!
//! A [`ConceptNode`] is one unit of formalization work. Its identity,
//! description and depth are fixed at creation. Everything else is written
//! through [`ConceptGraph`](crate::graph::ConceptGraph) transition methods,
//! which check [`NodeStatus::can_transition_to`] first.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::ConceptId;

/// Lifecycle status of a concept.
///
/// Allowed paths: `Pending -> Grounded`, `Pending -> ToSynthesize`,
/// `ToSynthesize -> Synthesized`, `ToSynthesize -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Created, not yet resolved or expanded.
    Pending,
    /// Found in the reference library.
    Grounded,
    /// Absent from the library; will be synthesized in Stage 2.
    ToSynthesize,
    /// Synthesized code compiled successfully.
    Synthesized,
    /// Synthesis budget exhausted without a compiling candidate.
    Failed,
}

impl NodeStatus {
    /// Returns `true` if `self -> next` is one of the four lifecycle edges.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (NodeStatus::Pending, NodeStatus::Grounded)
                | (NodeStatus::Pending, NodeStatus::ToSynthesize)
                | (NodeStatus::ToSynthesize, NodeStatus::Synthesized)
                | (NodeStatus::ToSynthesize, NodeStatus::Failed)
        )
    }

    /// Returns `true` once Stage 1 is done with this node.
    pub fn is_resolved(self) -> bool {
        self != NodeStatus::Pending
    }

    /// Returns `true` if no further transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Grounded | NodeStatus::Synthesized | NodeStatus::Failed
        )
    }

    /// Returns `true` for nodes the scheduler places in the build order.
    pub fn is_synthesis_target(self) -> bool {
        matches!(
            self,
            NodeStatus::ToSynthesize | NodeStatus::Synthesized | NodeStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Grounded => "grounded",
            NodeStatus::ToSynthesize => "to_synthesize",
            NodeStatus::Synthesized => "synthesized",
            NodeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Library entry a grounded concept resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedReference {
    /// Fully qualified library name, e.g. `Even` or `Subgroup.index`.
    pub canonical_id: String,
    /// Informal description returned by the search index, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub informal_description: Option<String>,
    /// Relevance distance of the accepted hit (lower is closer).
    pub distance: f64,
}

/// A node in the concept graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptNode {
    id: ConceptId,
    description: String,
    depth: u32,
    pub(crate) status: NodeStatus,
    pub(crate) resolved_reference: Option<ResolvedReference>,
    pub(crate) statement_shape: Option<String>,
    pub(crate) synthesized_code: Option<String>,
    pub(crate) attempt_count: u32,
    pub(crate) last_diagnostics: Vec<String>,
}

impl ConceptNode {
    pub(crate) fn new(id: ConceptId, description: &str, depth: u32) -> Self {
        ConceptNode {
            id,
            description: description.trim().to_string(),
            depth,
            status: NodeStatus::Pending,
            resolved_reference: None,
            statement_shape: None,
            synthesized_code: None,
            attempt_count: 0,
            last_diagnostics: Vec::new(),
        }
    }

    pub fn id(&self) -> ConceptId {
        self.id
    }

    /// Informal statement of the concept (trimmed at creation).
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Distance from the root; the root has depth 0.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn resolved_reference(&self) -> Option<&ResolvedReference> {
        self.resolved_reference.as_ref()
    }

    /// Formal statement shape proposed when the concept was expanded.
    pub fn statement_shape(&self) -> Option<&str> {
        self.statement_shape.as_deref()
    }

    pub fn synthesized_code(&self) -> Option<&str> {
        self.synthesized_code.as_deref()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Compiler diagnostics of the last failed attempt.
    pub fn last_diagnostics(&self) -> &[String] {
        &self.last_diagnostics
    }

    /// Lookup key used to share sub-concepts across the graph.
    pub fn normalized_name(&self) -> String {
        normalize_description(&self.description)
    }
}

/// Collapses whitespace and lower-cases a description.
///
/// Two descriptions with the same normalized form are treated as the same
/// concept when the expander links sub-concepts.
pub fn normalize_description(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
