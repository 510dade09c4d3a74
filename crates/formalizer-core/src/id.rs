//! Stable ID newtype for concept graph nodes.
//!
//! A [`ConceptId`] is assigned when a concept is inserted and never changes.
//! Concepts are never removed, so the inner value doubles as the creation
//! order and is what the scheduler uses to break ties.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Stable concept identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConceptId(pub u32);

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Bridge between ConceptId and petgraph's NodeIndex<u32>.

impl From<NodeIndex<u32>> for ConceptId {
    fn from(idx: NodeIndex<u32>) -> Self {
        ConceptId(idx.index() as u32)
    }
}

impl From<ConceptId> for NodeIndex<u32> {
    fn from(id: ConceptId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}
