//! Stage 1 driver: grows the concept graph from one informal statement.
//!
//! A FIFO worklist seeded with the root gives breadth-first decomposition.
//! Each `Pending` concept is first looked up in the library; a miss (or a
//! failed lookup) sends it to the expander, whose new children join the
//! back of the worklist. The loop ends when the worklist is empty, at which
//! point no concept is `Pending`.

use std::collections::VecDeque;
use std::sync::Arc;

use formalizer_core::{ConceptGraph, ConceptId, CoreError, NodeStatus, RunConfig};
use tracing::{debug, info, warn};

use crate::expander::{DecompositionExpander, ExpansionOutcome};
use crate::grounding::{GroundingDecision, GroundingResolver};
use crate::llm_provider::{CompletionOptions, LanguageModel};
use crate::search::ConceptSearch;

pub struct GraphBuilder {
    resolver: GroundingResolver,
    expander: DecompositionExpander,
    config: RunConfig,
}

impl GraphBuilder {
    pub fn new(
        search: Arc<dyn ConceptSearch>,
        model: Arc<dyn LanguageModel>,
        config: RunConfig,
        options: CompletionOptions,
    ) -> Self {
        GraphBuilder {
            resolver: GroundingResolver::new(search, model.clone(), config.clone(), options),
            expander: DecompositionExpander::new(model, config.clone(), options),
            config,
        }
    }

    /// Runs Stage 1 to completion for `statement`.
    pub async fn build(&self, statement: &str) -> Result<ConceptGraph, CoreError> {
        let mut graph = ConceptGraph::new(statement);
        let mut worklist: VecDeque<ConceptId> = VecDeque::from([graph.root()]);
        info!(statement, "stage 1 started");

        while let Some(id) = worklist.pop_front() {
            if graph.get(id)?.status() != NodeStatus::Pending {
                continue;
            }
            for child in self.process(&mut graph, id).await? {
                worklist.push_back(child);
            }
        }

        info!(
            concepts = graph.len(),
            grounded = graph.count_by_status(NodeStatus::Grounded),
            to_synthesize = graph.count_by_status(NodeStatus::ToSynthesize),
            "stage 1 finished"
        );
        Ok(graph)
    }

    /// Resolves or expands one concept and returns newly spawned children.
    async fn process(
        &self,
        graph: &mut ConceptGraph,
        id: ConceptId,
    ) -> Result<Vec<ConceptId>, CoreError> {
        let description = graph.get(id)?.description().to_string();
        let skip_grounding = id == graph.root() && self.config.planner.decompose_root;

        if !skip_grounding {
            match self.resolver.resolve(&description).await {
                Ok(GroundingDecision::Grounded(reference)) => {
                    graph.mark_grounded(id, reference)?;
                    return Ok(Vec::new());
                }
                Ok(GroundingDecision::NotFound) => {
                    debug!(concept = id.0, "not in library, expanding");
                }
                Err(err) => {
                    warn!(concept = id.0, error = %err, "grounding failed, treating as not found");
                }
            }
        }

        let outcome = self.expander.expand(graph, id).await?;
        debug!(concept = id.0, ?outcome, "expansion finished");
        Ok(match outcome {
            ExpansionOutcome::Expanded { spawned, .. } => spawned,
            _ => Vec::new(),
        })
    }
}
