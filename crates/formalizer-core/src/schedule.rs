//! Build scheduler: deterministic dependency-first ordering.
//!
//! Kahn's algorithm over the whole graph, with a min-heap on [`ConceptId`]
//! so ties always break by creation order. The order places every concept
//! after all of its dependencies.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::CoreError;
use crate::graph::ConceptGraph;
use crate::id::ConceptId;
use crate::node::NodeStatus;

/// Topological order of every concept, dependencies first.
///
/// Returns [`CoreError::CycleDetected`] naming the smallest concept that
/// could not be scheduled if the graph somehow contains a cycle.
pub fn topological_order(graph: &ConceptGraph) -> Result<Vec<ConceptId>, CoreError> {
    let ids = graph.ids();
    let mut remaining: HashMap<ConceptId, usize> = ids
        .iter()
        .map(|&id| (id, graph.dependencies(id).len()))
        .collect();

    let mut ready: BinaryHeap<Reverse<ConceptId>> = remaining
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(&id, _)| Reverse(id))
        .collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);
        for dependent in graph.dependents(id) {
            if let Some(count) = remaining.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
    }

    if order.len() != ids.len() {
        let stuck = ids
            .into_iter()
            .find(|id| remaining.get(id).copied().unwrap_or(0) > 0)
            .unwrap_or(graph.root());
        return Err(CoreError::CycleDetected { id: stuck });
    }

    Ok(order)
}

/// The synthesis build order: [`topological_order`] filtered to concepts
/// that Stage 2 handles (`ToSynthesize`, `Synthesized`, `Failed`).
///
/// Refuses graphs that still hold `Pending` concepts.
pub fn build_order(graph: &ConceptGraph) -> Result<Vec<ConceptId>, CoreError> {
    let pending = graph.pending();
    if !pending.is_empty() {
        return Err(CoreError::GraphIncomplete { pending });
    }

    let order = topological_order(graph)?;
    Ok(order
        .into_iter()
        .filter(|&id| {
            graph
                .node(id)
                .map(|node| node.status().is_synthesis_target())
                .unwrap_or(false)
        })
        .collect())
}

/// Every concept in the order the assembler walks: all resolved concepts,
/// dependencies first. Grounded concepts are included so they can be
/// annotated.
pub fn resolved_order(graph: &ConceptGraph) -> Result<Vec<ConceptId>, CoreError> {
    let order = topological_order(graph)?;
    Ok(order
        .into_iter()
        .filter(|&id| {
            graph
                .node(id)
                .map(|node| node.status() != NodeStatus::Pending)
                .unwrap_or(false)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ResolvedReference;
    use proptest::prelude::*;

    fn position(order: &[ConceptId], id: ConceptId) -> usize {
        order.iter().position(|&x| x == id).unwrap()
    }

    #[test]
    fn leaves_come_first_and_ties_break_by_id() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let a = graph.add_concept(root, "a").unwrap();
        let b = graph.add_concept(root, "b").unwrap();
        let c = graph.add_concept(a, "c").unwrap();

        let order = topological_order(&graph).unwrap();
        assert_eq!(order, vec![b, c, a, root]);
    }

    #[test]
    fn shared_dependency_precedes_both_dependents() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let a = graph.add_concept(root, "a").unwrap();
        let b = graph.add_concept(root, "b").unwrap();
        let shared = graph.add_concept(a, "shared").unwrap();
        graph.add_dependency(b, shared).unwrap();

        let order = topological_order(&graph).unwrap();
        assert!(position(&order, shared) < position(&order, a));
        assert!(position(&order, shared) < position(&order, b));
        assert_eq!(*order.last().unwrap(), root);
    }

    #[test]
    fn build_order_refuses_pending_nodes() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let a = graph.add_concept(root, "a").unwrap();
        graph.mark_to_synthesize(root, None).unwrap();

        let err = build_order(&graph).unwrap_err();
        match err {
            CoreError::GraphIncomplete { pending } => assert_eq!(pending, vec![a]),
            other => panic!("expected GraphIncomplete, got {other:?}"),
        }
    }

    #[test]
    fn build_order_skips_grounded_nodes() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let a = graph.add_concept(root, "a").unwrap();
        let b = graph.add_concept(root, "b").unwrap();
        graph.mark_to_synthesize(root, None).unwrap();
        graph
            .mark_grounded(
                a,
                ResolvedReference {
                    canonical_id: "A".into(),
                    informal_description: None,
                    distance: 0.0,
                },
            )
            .unwrap();
        graph.mark_to_synthesize(b, None).unwrap();

        assert_eq!(build_order(&graph).unwrap(), vec![b, root]);
        assert_eq!(resolved_order(&graph).unwrap(), vec![a, b, root]);
    }

    /// Builds a random DAG: node `i` hangs off a parent below it, then extra
    /// links are attempted and dropped when they would close a cycle.
    fn random_graph(parents: &[u32], extra: &[(u32, u32)]) -> ConceptGraph {
        let mut graph = ConceptGraph::new("root");
        for (i, &p) in parents.iter().enumerate() {
            let parent = ConceptId(p % (i as u32 + 1));
            graph.add_concept(parent, &format!("concept {}", i + 1)).unwrap();
        }
        let n = graph.len() as u32;
        for &(a, b) in extra {
            let _ = graph.add_dependency(ConceptId(a % n), ConceptId(b % n));
        }
        graph
    }

    proptest! {
        #[test]
        fn order_is_a_valid_topological_sort(
            parents in prop::collection::vec(any::<u32>(), 0..24),
            extra in prop::collection::vec((any::<u32>(), any::<u32>()), 0..32),
        ) {
            let graph = random_graph(&parents, &extra);
            let order = topological_order(&graph).unwrap();

            prop_assert_eq!(order.len(), graph.len());
            for id in graph.ids() {
                for dep in graph.dependencies(id) {
                    prop_assert!(position(&order, dep) < position(&order, id));
                }
            }
        }

        #[test]
        fn order_is_deterministic(
            parents in prop::collection::vec(any::<u32>(), 0..16),
            extra in prop::collection::vec((any::<u32>(), any::<u32>()), 0..16),
        ) {
            let first = topological_order(&random_graph(&parents, &extra)).unwrap();
            let second = topological_order(&random_graph(&parents, &extra)).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn rejected_links_leave_graph_acyclic(
            parents in prop::collection::vec(any::<u32>(), 1..16),
            extra in prop::collection::vec((any::<u32>(), any::<u32>()), 0..48),
        ) {
            let graph = random_graph(&parents, &extra);
            for id in graph.ids() {
                for dep in graph.dependencies(id) {
                    prop_assert!(!graph.depends_on(dep, id));
                }
            }
        }

        #[test]
        fn build_order_contains_exactly_the_targets(
            parents in prop::collection::vec(any::<u32>(), 0..16),
            grounded in prop::collection::vec(any::<bool>(), 17),
        ) {
            let mut graph = random_graph(&parents, &[]);
            for id in graph.ids() {
                if grounded[id.0 as usize] {
                    graph.mark_grounded(id, ResolvedReference {
                        canonical_id: format!("C{id}"),
                        informal_description: None,
                        distance: 0.0,
                    }).unwrap();
                } else {
                    graph.mark_to_synthesize(id, None).unwrap();
                }
            }

            let order = build_order(&graph).unwrap();
            let expected = graph.count_by_status(NodeStatus::ToSynthesize);
            prop_assert_eq!(order.len(), expected);
            for id in &order {
                prop_assert!(!grounded[id.0 as usize]);
            }
        }
    }
}
