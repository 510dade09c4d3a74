//! Grounding resolver: decides whether a concept already exists in the
//! reference library.
//!
//! The search collaborator ranks candidates by distance. The closest one is
//! accepted when its distance is within the acceptance threshold. With
//! `confirm_with_model`, every candidate within the threshold is shown to
//! the model, and only a candidate it names grounds the concept.

use std::sync::Arc;

use formalizer_core::{CollaboratorError, ResolvedReference, RunConfig};
use tracing::{debug, info};

use crate::call::bounded;
use crate::llm_provider::{CompletionOptions, LanguageModel};
use crate::prompts;
use crate::response::{parse_confirmation, Confirmation};
use crate::search::{ConceptSearch, SearchHit};

#[derive(Debug, Clone, PartialEq)]
pub enum GroundingDecision {
    Grounded(ResolvedReference),
    NotFound,
}

pub struct GroundingResolver {
    search: Arc<dyn ConceptSearch>,
    model: Arc<dyn LanguageModel>,
    config: RunConfig,
    options: CompletionOptions,
}

impl GroundingResolver {
    pub fn new(
        search: Arc<dyn ConceptSearch>,
        model: Arc<dyn LanguageModel>,
        config: RunConfig,
        options: CompletionOptions,
    ) -> Self {
        GroundingResolver {
            search,
            model,
            config,
            options,
        }
    }

    /// Looks `description` up in the library.
    ///
    /// Collaborator failures are returned to the caller, which treats them
    /// as a miss.
    pub async fn resolve(&self, description: &str) -> Result<GroundingDecision, CollaboratorError> {
        let queries = vec![description.to_string()];
        let mut hits = bounded(
            "search",
            self.config.call_timeout(),
            self.search.search(&queries, self.config.planner.search_results),
        )
        .await?;

        hits.retain(|h| h.distance.is_finite());
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let threshold = self.config.planner.acceptance_threshold;
        let accepted: Vec<SearchHit> = hits
            .into_iter()
            .filter(|h| h.distance <= threshold)
            .collect();

        let Some(best) = accepted.first() else {
            debug!(concept = description, "no search hit within threshold {}", threshold);
            return Ok(GroundingDecision::NotFound);
        };

        if !self.config.planner.confirm_with_model {
            info!(
                concept = description,
                reference = %best.canonical_id,
                distance = best.distance,
                "grounded by search"
            );
            return Ok(GroundingDecision::Grounded(reference_from(best)));
        }

        let messages = prompts::grounding_confirmation(description, &accepted);
        let answer = bounded(
            "model",
            self.config.call_timeout(),
            self.model.complete(&messages, &self.options),
        )
        .await?;
        debug!(concept = description, "grounding confirmation: {}", answer);

        match parse_confirmation(&answer) {
            Confirmation::Found(name) => match accepted.iter().find(|h| h.canonical_id == name) {
                Some(hit) => {
                    info!(concept = description, reference = %hit.canonical_id, "grounded by model confirmation");
                    Ok(GroundingDecision::Grounded(reference_from(hit)))
                }
                None => {
                    debug!(concept = description, named = %name, "model named a non-candidate");
                    Ok(GroundingDecision::NotFound)
                }
            },
            Confirmation::NoMatch => Ok(GroundingDecision::NotFound),
        }
    }
}

fn reference_from(hit: &SearchHit) -> ResolvedReference {
    ResolvedReference {
        canonical_id: hit.canonical_id.clone(),
        informal_description: hit.informal_description.clone(),
        distance: hit.distance,
    }
}
