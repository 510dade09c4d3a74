//! Decomposition expander: turns an unresolved concept into sub-concepts.
//!
//! Every path through [`DecompositionExpander::expand`] leaves the concept
//! `ToSynthesize`. What differs is whether new dependencies were attached.
//! Sub-concepts whose normalized name already exists are linked to the
//! existing concept instead of being duplicated, which keeps the graph a DAG
//! rather than a tree.

use std::sync::Arc;

use formalizer_core::{
    normalize_description, ConceptGraph, ConceptId, CoreError, RunConfig,
};
use tracing::{debug, info, warn};

use crate::call::bounded;
use crate::llm_provider::{CompletionOptions, LanguageModel};
use crate::prompts;
use crate::response::{parse_decomposition, Decomposition};

/// How an expansion step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpansionOutcome {
    /// New and shared dependencies were attached.
    Expanded {
        spawned: Vec<ConceptId>,
        shared: Vec<ConceptId>,
    },
    /// The model proposed nothing usable, or never answered well-formed.
    Irreducible,
    /// The concept sits at `max_depth`; the model was not asked.
    DepthLimited,
    /// Attaching the proposal would exceed `max_nodes`.
    NodeCapReached,
    /// A proposed link to an existing concept would have closed a cycle.
    CycleRejected { target: ConceptId },
}

pub struct DecompositionExpander {
    model: Arc<dyn LanguageModel>,
    config: RunConfig,
    options: CompletionOptions,
}

impl DecompositionExpander {
    pub fn new(model: Arc<dyn LanguageModel>, config: RunConfig, options: CompletionOptions) -> Self {
        DecompositionExpander {
            model,
            config,
            options,
        }
    }

    /// Expands `id`, which must still be `Pending`.
    ///
    /// Only graph invariant violations are returned as errors. Model
    /// failures end as [`ExpansionOutcome::Irreducible`].
    pub async fn expand(
        &self,
        graph: &mut ConceptGraph,
        id: ConceptId,
    ) -> Result<ExpansionOutcome, CoreError> {
        let node = graph.get(id)?;
        let description = node.description().to_string();

        if node.depth() >= self.config.planner.max_depth {
            info!(concept = id.0, depth = node.depth(), "depth limit reached, no expansion");
            graph.mark_to_synthesize(id, None)?;
            return Ok(ExpansionOutcome::DepthLimited);
        }

        let Some(proposal) = self.propose(&description).await else {
            graph.mark_to_synthesize(id, None)?;
            return Ok(ExpansionOutcome::Irreducible);
        };

        apply_decomposition(graph, id, proposal, self.config.planner.max_nodes)
    }

    /// Asks the model, retrying malformed or failed replies.
    async fn propose(&self, description: &str) -> Option<Decomposition> {
        let messages = prompts::decomposition(description);
        let tries = self.config.planner.expansion_retries + 1;

        for attempt in 1..=tries {
            let reply = bounded(
                "model",
                self.config.call_timeout(),
                self.model.complete(&messages, &self.options),
            )
            .await;

            match reply.and_then(|raw| {
                debug!(concept = description, "decomposition reply: {}", raw);
                parse_decomposition(&raw)
            }) {
                Ok(decomposition) => return Some(decomposition),
                Err(err) => {
                    warn!(concept = description, attempt, tries, error = %err, "decomposition failed");
                }
            }
        }
        None
    }
}

/// Attaches a parsed decomposition to `id` and marks it `ToSynthesize`.
///
/// All-or-nothing: if any shared link would close a cycle, or the new
/// concepts would push the graph past `max_nodes`, nothing is attached.
pub fn apply_decomposition(
    graph: &mut ConceptGraph,
    id: ConceptId,
    proposal: Decomposition,
    max_nodes: usize,
) -> Result<ExpansionOutcome, CoreError> {
    let mut fresh: Vec<String> = Vec::new();
    let mut fresh_keys: Vec<String> = Vec::new();
    let mut shared: Vec<ConceptId> = Vec::new();

    for name in proposal.sub_concepts {
        let key = normalize_description(&name);
        if key.is_empty() || fresh_keys.contains(&key) {
            continue;
        }
        match graph.find_by_description(&key) {
            Some(existing) if existing == id => {
                warn!(concept = id.0, sub_concept = %name, "dropping self-referential sub-concept");
            }
            Some(existing) => {
                if !shared.contains(&existing) {
                    shared.push(existing);
                }
            }
            None => {
                fresh_keys.push(key);
                fresh.push(name);
            }
        }
    }

    let shape = proposal.statement_shape;

    if fresh.is_empty() && shared.is_empty() {
        graph.mark_to_synthesize(id, shape)?;
        return Ok(ExpansionOutcome::Irreducible);
    }

    if let Some(&target) = shared.iter().find(|&&s| graph.would_create_cycle(id, s)) {
        warn!(concept = id.0, target = target.0, "decomposition would close a cycle, rejected");
        graph.mark_to_synthesize(id, shape)?;
        return Ok(ExpansionOutcome::CycleRejected { target });
    }

    if graph.len() + fresh.len() > max_nodes {
        warn!(
            concept = id.0,
            proposed = fresh.len(),
            nodes = graph.len(),
            max_nodes,
            "node cap reached, decomposition dropped"
        );
        graph.mark_to_synthesize(id, shape)?;
        return Ok(ExpansionOutcome::NodeCapReached);
    }

    let mut spawned = Vec::with_capacity(fresh.len());
    for name in &fresh {
        spawned.push(graph.add_concept(id, name)?);
    }
    for &target in &shared {
        graph.add_dependency(id, target)?;
    }
    graph.mark_to_synthesize(id, shape)?;

    info!(
        concept = id.0,
        spawned = spawned.len(),
        shared = shared.len(),
        "concept expanded"
    );
    Ok(ExpansionOutcome::Expanded { spawned, shared })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModel;
    use formalizer_core::NodeStatus;

    fn expander(model: ScriptedModel, config: RunConfig) -> DecompositionExpander {
        DecompositionExpander::new(Arc::new(model), config, CompletionOptions::default())
    }

    fn proposal(names: &[&str]) -> Decomposition {
        Decomposition {
            sub_concepts: names.iter().map(|s| s.to_string()).collect(),
            statement_shape: None,
        }
    }

    #[tokio::test]
    async fn two_sub_concepts_become_pending_children() {
        let model = ScriptedModel::new().on(
            "Decompose",
            [r#"{"sub_concepts": ["binary operation with identity and inverses", "finite carrier set"], "statement_shape": "class FiniteGroup (G : Type*) extends Group G, Fintype G"}"#],
        );
        let mut graph = ConceptGraph::new("a group with finite order");
        let root = graph.root();

        let outcome = expander(model, RunConfig::default())
            .expand(&mut graph, root)
            .await
            .unwrap();

        let ExpansionOutcome::Expanded { spawned, shared } = outcome else {
            panic!("expected expansion, got {outcome:?}");
        };
        assert_eq!(spawned.len(), 2);
        assert!(shared.is_empty());
        assert_eq!(graph.dependencies(root), spawned);
        for child in &spawned {
            assert_eq!(graph.get(*child).unwrap().status(), NodeStatus::Pending);
            assert_eq!(graph.get(*child).unwrap().depth(), 1);
        }
        let parent = graph.get(root).unwrap();
        assert_eq!(parent.status(), NodeStatus::ToSynthesize);
        assert!(parent.statement_shape().unwrap().starts_with("class FiniteGroup"));
    }

    #[tokio::test]
    async fn empty_proposal_is_irreducible() {
        let model = ScriptedModel::new().on("Decompose", ["[]"]);
        let mut graph = ConceptGraph::new("natural number");
        let root = graph.root();

        let outcome = expander(model, RunConfig::default())
            .expand(&mut graph, root)
            .await
            .unwrap();
        assert_eq!(outcome, ExpansionOutcome::Irreducible);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.get(root).unwrap().status(), NodeStatus::ToSynthesize);
    }

    #[tokio::test]
    async fn depth_limit_skips_the_model() {
        let model = Arc::new(ScriptedModel::new().on("Decompose", [r#"["a"]"#]));
        let mut config = RunConfig::default();
        config.planner.max_depth = 1;
        let expander =
            DecompositionExpander::new(model.clone(), config, CompletionOptions::default());

        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let child = graph.add_concept(root, "child").unwrap();

        let outcome = expander.expand(&mut graph, child).await.unwrap();
        assert_eq!(outcome, ExpansionOutcome::DepthLimited);
        assert_eq!(model.prompts().len(), 0);
        assert_eq!(graph.get(child).unwrap().status(), NodeStatus::ToSynthesize);
    }

    #[tokio::test]
    async fn malformed_replies_are_retried_then_irreducible() {
        let model = Arc::new(
            ScriptedModel::new().on("Decompose", ["this concept is atomic", "still prose"]),
        );
        let mut config = RunConfig::default();
        config.planner.expansion_retries = 1;
        let expander =
            DecompositionExpander::new(model.clone(), config, CompletionOptions::default());

        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let outcome = expander.expand(&mut graph, root).await.unwrap();

        assert_eq!(outcome, ExpansionOutcome::Irreducible);
        assert_eq!(model.calls_matching("Decompose"), 2);
        assert_eq!(graph.get(root).unwrap().status(), NodeStatus::ToSynthesize);
    }

    #[tokio::test]
    async fn retry_recovers_from_one_bad_reply() {
        let model = ScriptedModel::new().on("Decompose", ["oops", r#"["subgroup"]"#]);
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();

        let outcome = expander(model, RunConfig::default())
            .expand(&mut graph, root)
            .await
            .unwrap();
        assert!(matches!(outcome, ExpansionOutcome::Expanded { .. }));
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn existing_names_are_shared_not_duplicated() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let a = graph.add_concept(root, "subgroup").unwrap();
        let b = graph.add_concept(root, "normal subgroup").unwrap();
        graph.mark_to_synthesize(root, None).unwrap();

        let outcome =
            apply_decomposition(&mut graph, b, proposal(&["Subgroup ", "quotient group"]), 32)
                .unwrap();

        let ExpansionOutcome::Expanded { spawned, shared } = outcome else {
            panic!("expected expansion");
        };
        assert_eq!(shared, vec![a]);
        assert_eq!(spawned.len(), 1);
        assert_eq!(graph.dependencies(b), vec![a, spawned[0]]);
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn self_reference_is_dropped() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let outcome =
            apply_decomposition(&mut graph, root, proposal(&["ROOT", "helper"]), 32).unwrap();
        let ExpansionOutcome::Expanded { spawned, .. } = outcome else {
            panic!("expected expansion");
        };
        assert_eq!(spawned.len(), 1);
        assert_eq!(graph.get(spawned[0]).unwrap().description(), "helper");
    }

    #[test]
    fn cycle_closing_link_rejects_whole_expansion() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let child = graph.add_concept(root, "child").unwrap();
        graph.mark_to_synthesize(root, None).unwrap();

        let outcome =
            apply_decomposition(&mut graph, child, proposal(&["brand new", "root"]), 32).unwrap();

        assert_eq!(outcome, ExpansionOutcome::CycleRejected { target: root });
        assert_eq!(graph.len(), 2);
        assert!(graph.dependencies(child).is_empty());
        assert_eq!(graph.get(child).unwrap().status(), NodeStatus::ToSynthesize);
    }

    #[test]
    fn node_cap_forces_synthesis() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let outcome =
            apply_decomposition(&mut graph, root, proposal(&["a", "b", "c"]), 3).unwrap();

        assert_eq!(outcome, ExpansionOutcome::NodeCapReached);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.get(root).unwrap().status(), NodeStatus::ToSynthesize);
    }

    #[test]
    fn duplicate_names_in_one_proposal_collapse() {
        let mut graph = ConceptGraph::new("root");
        let root = graph.root();
        let outcome = apply_decomposition(
            &mut graph,
            root,
            proposal(&["Finite set", "finite  set", "order"]),
            32,
        )
        .unwrap();
        let ExpansionOutcome::Expanded { spawned, .. } = outcome else {
            panic!("expected expansion");
        };
        assert_eq!(spawned.len(), 2);
    }
}
