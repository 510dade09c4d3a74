//! ConceptGraph: the arena holding every concept and its dependency edges.
//!
//! [`ConceptGraph`] is the single entry point for building and querying the
//! dependency structure. Nodes live in a private `StableGraph` indexed by
//! [`ConceptId`]. Edges point from the dependent concept to the concept it
//! requires.
//!
//! # Invariants
//!
//! - **Acyclic.** [`ConceptGraph::add_dependency`] refuses any edge that
//!   would close a cycle, so the relation stays a DAG after every call.
//! - **Append-only.** Concepts are never removed, so IDs are dense and equal
//!   to creation order.
//! - **Guarded lifecycle.** Status changes only go through the `mark_*`
//!   methods, which reject anything outside
//!   [`NodeStatus::can_transition_to`]. Each stage-specific field is written
//!   exactly once, by the transition that owns it.

use std::collections::HashSet;

use indexmap::IndexMap;
use petgraph::algo::has_path_connecting;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::ConceptId;
use crate::node::{normalize_description, ConceptNode, NodeStatus, ResolvedReference};

/// How a dependency edge came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyEdge {
    /// The dependency was created by expanding the dependent.
    Spawned,
    /// The dependency already existed and was linked by name.
    Shared,
}

/// The concept dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptGraph {
    graph: StableGraph<ConceptNode, DependencyEdge, Directed, u32>,
    root: ConceptId,
    /// Normalized description -> concept, in creation order.
    by_name: IndexMap<String, ConceptId>,
}

impl ConceptGraph {
    /// Creates a graph whose only node is the `Pending` root concept.
    pub fn new(root_description: &str) -> Self {
        let mut graph = StableGraph::<ConceptNode, DependencyEdge, Directed, u32>::new();
        let idx = graph.add_node(ConceptNode::new(ConceptId(0), root_description, 0));
        let root = ConceptId::from(idx);

        let mut by_name = IndexMap::new();
        by_name.insert(normalize_description(root_description), root);

        ConceptGraph {
            graph,
            root,
            by_name,
        }
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn root(&self) -> ConceptId {
        self.root
    }

    /// Returns a read-only reference to the underlying petgraph.
    pub fn graph(&self) -> &StableGraph<ConceptNode, DependencyEdge, Directed, u32> {
        &self.graph
    }

    pub fn node(&self, id: ConceptId) -> Option<&ConceptNode> {
        self.graph.node_weight(id.into())
    }

    /// Like [`node`](Self::node) but reports a missing ID as an error.
    pub fn get(&self, id: ConceptId) -> Result<&ConceptNode, CoreError> {
        self.node(id).ok_or(CoreError::ConceptNotFound { id })
    }

    /// Looks up a concept by description, ignoring case and spacing.
    pub fn find_by_description(&self, description: &str) -> Option<ConceptId> {
        self.by_name
            .get(&normalize_description(description))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All concept IDs in creation order.
    pub fn ids(&self) -> Vec<ConceptId> {
        let mut ids: Vec<ConceptId> = self.graph.node_indices().map(ConceptId::from).collect();
        ids.sort();
        ids
    }

    /// All concepts in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &ConceptNode> + '_ {
        self.ids()
            .into_iter()
            .filter_map(move |id| self.graph.node_weight(id.into()))
    }

    /// Direct dependencies of `id`, in creation order.
    pub fn dependencies(&self, id: ConceptId) -> Vec<ConceptId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Concepts that directly depend on `id`, in creation order.
    pub fn dependents(&self, id: ConceptId) -> Vec<ConceptId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Every concept reachable from `id` through dependency edges, excluding
    /// `id` itself, ordered so that each concept follows its own dependencies.
    pub fn transitive_dependencies(&self, id: ConceptId) -> Vec<ConceptId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id);
        self.post_order(id, &mut seen, &mut order);
        order
    }

    /// Returns `true` if `dependency` is reachable from `dependent`.
    pub fn depends_on(&self, dependent: ConceptId, dependency: ConceptId) -> bool {
        let from: NodeIndex<u32> = dependent.into();
        let to: NodeIndex<u32> = dependency.into();
        if self.graph.node_weight(from).is_none() || self.graph.node_weight(to).is_none() {
            return false;
        }
        has_path_connecting(&self.graph, from, to, None)
    }

    /// Returns `true` if adding `dependent -> dependency` would close a cycle.
    pub fn would_create_cycle(&self, dependent: ConceptId, dependency: ConceptId) -> bool {
        dependent == dependency || self.depends_on(dependency, dependent)
    }

    /// Number of concepts currently in `status`.
    pub fn count_by_status(&self, status: NodeStatus) -> usize {
        self.graph
            .node_weights()
            .filter(|node| node.status == status)
            .count()
    }

    /// IDs of concepts still `Pending`, in creation order.
    pub fn pending(&self) -> Vec<ConceptId> {
        self.nodes()
            .filter(|node| node.status == NodeStatus::Pending)
            .map(ConceptNode::id)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Structural mutation
    // -----------------------------------------------------------------------

    /// Creates a new `Pending` concept required by `parent`.
    ///
    /// The new concept sits one level below the parent and is linked with a
    /// [`DependencyEdge::Spawned`] edge. A fresh node cannot close a cycle,
    /// so this only fails when `parent` does not exist.
    pub fn add_concept(
        &mut self,
        parent: ConceptId,
        description: &str,
    ) -> Result<ConceptId, CoreError> {
        let parent_depth = self.get(parent)?.depth();
        let next = ConceptId(self.graph.node_count() as u32);
        let idx = self
            .graph
            .add_node(ConceptNode::new(next, description, parent_depth + 1));
        let id = ConceptId::from(idx);
        debug_assert_eq!(id, next, "concept ids must stay dense");

        self.by_name.entry(normalize_description(description)).or_insert(id);
        self.graph
            .add_edge(parent.into(), idx, DependencyEdge::Spawned);

        Ok(id)
    }

    /// Links an existing concept as a dependency of `dependent`.
    ///
    /// Linking an edge that already exists is a no-op. Self-edges and edges
    /// that would close a cycle are rejected with
    /// [`CoreError::CycleRejected`] and leave the graph unchanged.
    pub fn add_dependency(
        &mut self,
        dependent: ConceptId,
        dependency: ConceptId,
    ) -> Result<(), CoreError> {
        self.get(dependent)?;
        self.get(dependency)?;

        if self.would_create_cycle(dependent, dependency) {
            return Err(CoreError::CycleRejected {
                dependent,
                dependency,
            });
        }

        let from: NodeIndex<u32> = dependent.into();
        let to: NodeIndex<u32> = dependency.into();
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, DependencyEdge::Shared);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle transitions
    // -----------------------------------------------------------------------

    /// `Pending -> Grounded`, recording the matched library entry.
    pub fn mark_grounded(
        &mut self,
        id: ConceptId,
        reference: ResolvedReference,
    ) -> Result<(), CoreError> {
        let node = self.transition(id, NodeStatus::Grounded)?;
        node.resolved_reference = Some(reference);
        Ok(())
    }

    /// `Pending -> ToSynthesize`, recording the proposed statement shape.
    pub fn mark_to_synthesize(
        &mut self,
        id: ConceptId,
        statement_shape: Option<String>,
    ) -> Result<(), CoreError> {
        let node = self.transition(id, NodeStatus::ToSynthesize)?;
        node.statement_shape = statement_shape.filter(|shape| !shape.trim().is_empty());
        Ok(())
    }

    /// Opens a new synthesis attempt and returns its 1-based number.
    ///
    /// Only valid while the concept is `ToSynthesize`. Fails with
    /// [`CoreError::AttemptBudgetExhausted`] once `max_attempts` have been
    /// made, so `attempt_count` can never exceed the budget.
    pub fn begin_attempt(&mut self, id: ConceptId, max_attempts: u32) -> Result<u32, CoreError> {
        let node = self
            .graph
            .node_weight_mut(id.into())
            .ok_or(CoreError::ConceptNotFound { id })?;
        if node.status != NodeStatus::ToSynthesize {
            return Err(CoreError::InvalidTransition {
                id,
                from: node.status,
                to: NodeStatus::ToSynthesize,
            });
        }
        if node.attempt_count >= max_attempts {
            return Err(CoreError::AttemptBudgetExhausted {
                id,
                max: max_attempts,
            });
        }
        node.attempt_count += 1;
        Ok(node.attempt_count)
    }

    /// `ToSynthesize -> Synthesized`, storing the compiled code.
    pub fn mark_synthesized(&mut self, id: ConceptId, code: String) -> Result<(), CoreError> {
        let node = self.transition(id, NodeStatus::Synthesized)?;
        node.synthesized_code = Some(code);
        node.last_diagnostics.clear();
        Ok(())
    }

    /// `ToSynthesize -> Failed`, keeping the final diagnostics for reporting.
    pub fn mark_failed(
        &mut self,
        id: ConceptId,
        diagnostics: Vec<String>,
    ) -> Result<(), CoreError> {
        let node = self.transition(id, NodeStatus::Failed)?;
        node.last_diagnostics = diagnostics;
        Ok(())
    }

    fn transition(
        &mut self,
        id: ConceptId,
        to: NodeStatus,
    ) -> Result<&mut ConceptNode, CoreError> {
        let node = self
            .graph
            .node_weight_mut(id.into())
            .ok_or(CoreError::ConceptNotFound { id })?;
        if !node.status.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                id,
                from: node.status,
                to,
            });
        }
        node.status = to;
        Ok(node)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn neighbors(&self, id: ConceptId, direction: Direction) -> Vec<ConceptId> {
        let idx: NodeIndex<u32> = id.into();
        if self.graph.node_weight(idx).is_none() {
            return Vec::new();
        }
        let mut out: Vec<ConceptId> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(ConceptId::from)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    fn post_order(&self, id: ConceptId, seen: &mut HashSet<ConceptId>, order: &mut Vec<ConceptId>) {
        for dep in self.dependencies(id) {
            if seen.insert(dep) {
                self.post_order(dep, seen, order);
                order.push(dep);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(name: &str) -> ResolvedReference {
        ResolvedReference {
            canonical_id: name.to_string(),
            informal_description: None,
            distance: 0.1,
        }
    }

    #[test]
    fn new_graph_has_pending_root() {
        let graph = ConceptGraph::new("a group with finite order");
        let root = graph.get(graph.root()).unwrap();
        assert_eq!(root.id(), ConceptId(0));
        assert_eq!(root.depth(), 0);
        assert_eq!(root.status(), NodeStatus::Pending);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn add_concept_links_parent_and_sets_depth() {
        let mut graph = ConceptGraph::new("a group with finite order");
        let root = graph.root();
        let a = graph
            .add_concept(root, "binary operation with identity and inverses")
            .unwrap();
        let b = graph.add_concept(root, "finite carrier set").unwrap();

        assert_eq!(a, ConceptId(1));
        assert_eq!(b, ConceptId(2));
        assert_eq!(graph.dependencies(root), vec![a, b]);
        assert_eq!(graph.dependents(a), vec![root]);
        assert_eq!(graph.get(b).unwrap().depth(), 1);
        assert_eq!(graph.find_by_description("Finite  Carrier Set"), Some(b));
    }

    #[test]
    fn add_concept_with_unknown_parent_errors() {
        let mut graph = ConceptGraph::new("root");
        let err = graph.add_concept(ConceptId(9), "orphan").unwrap_err();
        assert!(matches!(err, CoreError::ConceptNotFound { id } if id == ConceptId(9)));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn cycle_creating_dependency_is_rejected() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let a = graph.add_concept(root, "a").unwrap();
        let b = graph.add_concept(a, "b").unwrap();

        let err = graph.add_dependency(b, root).unwrap_err();
        assert!(matches!(err, CoreError::CycleRejected { .. }));
        let err = graph.add_dependency(a, a).unwrap_err();
        assert!(matches!(err, CoreError::CycleRejected { .. }));
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn shared_dependency_is_linked_once() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let a = graph.add_concept(root, "a").unwrap();
        let b = graph.add_concept(root, "b").unwrap();

        graph.add_dependency(a, b).unwrap();
        graph.add_dependency(a, b).unwrap();
        assert_eq!(graph.dependencies(a), vec![b]);
        assert_eq!(graph.dependents(b), vec![root, a]);
        assert!(graph.depends_on(root, b));
        assert!(!graph.depends_on(b, root));
    }

    #[test]
    fn transitive_dependencies_put_dependencies_first() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let a = graph.add_concept(root, "a").unwrap();
        let b = graph.add_concept(a, "b").unwrap();
        let c = graph.add_concept(root, "c").unwrap();
        graph.add_dependency(c, b).unwrap();

        let order = graph.transitive_dependencies(root);
        assert_eq!(order, vec![b, a, c]);
        assert_eq!(graph.transitive_dependencies(c), vec![b]);
    }

    #[test]
    fn lifecycle_transitions_are_guarded() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let leaf = graph.add_concept(root, "the set of even integers").unwrap();

        graph.mark_grounded(leaf, reference("Even")).unwrap();
        let err = graph.mark_to_synthesize(leaf, None).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition {
                from: NodeStatus::Grounded,
                to: NodeStatus::ToSynthesize,
                ..
            }
        ));

        let err = graph.mark_synthesized(root, "def x := 1".into()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        graph.mark_to_synthesize(root, Some("theorem root : True".into())).unwrap();
        graph.mark_synthesized(root, "theorem root : True := trivial".into()).unwrap();
        let node = graph.get(root).unwrap();
        assert_eq!(node.status(), NodeStatus::Synthesized);
        assert_eq!(node.statement_shape(), Some("theorem root : True"));
        assert!(graph.mark_failed(root, vec![]).is_err());
    }

    #[test]
    fn attempts_are_bounded() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        assert!(graph.begin_attempt(root, 2).is_err());

        graph.mark_to_synthesize(root, None).unwrap();
        assert_eq!(graph.begin_attempt(root, 2).unwrap(), 1);
        assert_eq!(graph.begin_attempt(root, 2).unwrap(), 2);
        let err = graph.begin_attempt(root, 2).unwrap_err();
        assert!(matches!(err, CoreError::AttemptBudgetExhausted { max: 2, .. }));
        assert_eq!(graph.get(root).unwrap().attempt_count(), 2);

        graph.mark_failed(root, vec!["type mismatch".into()]).unwrap();
        assert_eq!(graph.get(root).unwrap().last_diagnostics(), ["type mismatch"]);
    }

    #[test]
    fn status_queries() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let a = graph.add_concept(root, "a").unwrap();
        graph.mark_to_synthesize(root, None).unwrap();

        assert_eq!(graph.pending(), vec![a]);
        assert_eq!(graph.count_by_status(NodeStatus::ToSynthesize), 1);
        assert_eq!(graph.count_by_status(NodeStatus::Pending), 1);
    }

    #[test]
    fn serde_roundtrip_preserves_structure() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let a = graph.add_concept(root, "a").unwrap();
        graph.mark_grounded(a, reference("A")).unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let back: ConceptGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.dependencies(root), vec![a]);
        assert_eq!(
            back.get(a).unwrap().resolved_reference().unwrap().canonical_id,
            "A"
        );
    }
}
