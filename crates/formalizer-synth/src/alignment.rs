//! Optional semantic alignment check.
//!
//! Compilation proves the artifact is well-formed, not that it says what the
//! problem said. The aligner back-translates each synthesized concept into
//! natural language, merges the pieces, and asks the model to compare the
//! result with the original statement. The verdict is advisory: it is
//! recorded in the run report and never changes a node's status.
//!
//! The same prompts back the root precheck in Stage 2, where a single
//! candidate is judged against the statement before it is compiled.

use std::collections::HashMap;
use std::sync::Arc;

use formalizer_agent::call::bounded;
use formalizer_agent::prompts;
use formalizer_agent::response::{extract_json_object, split_imports};
use formalizer_agent::{ChatMessage, CompletionOptions, LanguageModel};
use formalizer_core::{
    build_order, CollaboratorError, ConceptGraph, ConceptId, CoreError, NodeStatus, RunConfig,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    /// Equivalent.
    #[serde(rename = "level_1")]
    Level1,
    /// Minor differences that keep the meaning.
    #[serde(rename = "level_2")]
    Level2,
    /// The meaning differs.
    #[serde(rename = "level_3")]
    Level3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentVerdict {
    pub consistency_level: ConsistencyLevel,
    #[serde(default)]
    pub discrepancies: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl AlignmentVerdict {
    /// Levels 1 and 2 count as consistent.
    pub fn is_consistent(&self) -> bool {
        self.consistency_level != ConsistencyLevel::Level3
    }

    fn inconsistent(reason: impl Into<String>) -> Self {
        AlignmentVerdict {
            consistency_level: ConsistencyLevel::Level3,
            discrepancies: vec![reason.into()],
            recommendations: Vec::new(),
        }
    }
}

pub struct SemanticAligner {
    model: Arc<dyn LanguageModel>,
    config: RunConfig,
    options: CompletionOptions,
}

impl SemanticAligner {
    pub fn new(model: Arc<dyn LanguageModel>, config: RunConfig, options: CompletionOptions) -> Self {
        SemanticAligner {
            model,
            config,
            options,
        }
    }

    /// Compares the synthesized graph against `statement`.
    ///
    /// Collaborator failures and malformed verdicts degrade to `level_3`.
    pub async fn align(
        &self,
        graph: &ConceptGraph,
        statement: &str,
    ) -> Result<AlignmentVerdict, CoreError> {
        let segments = self.back_translate(graph).await?;
        if segments.is_empty() {
            return Ok(AlignmentVerdict::inconsistent("no back-translation available"));
        }

        let merged = if segments.len() == 1 {
            segments[0].1.clone()
        } else {
            match self.ask(prompts::merge_back_translations(&segments)).await {
                Some(text) => text,
                None => {
                    return Ok(AlignmentVerdict::inconsistent(
                        "merging back-translations failed",
                    ))
                }
            }
        };
        debug!(%merged, "merged back-translation");

        let reply = match self.ask(prompts::semantic_check(statement, &merged)).await {
            Some(reply) => reply,
            None => return Ok(AlignmentVerdict::inconsistent("semantic check failed")),
        };
        let verdict = parse_verdict(&reply).unwrap_or_else(|err| {
            warn!(error = %err, "unreadable alignment verdict");
            AlignmentVerdict::inconsistent(format!("unreadable verdict: {}", err))
        });
        info!(level = ?verdict.consistency_level, "alignment finished");
        Ok(verdict)
    }

    /// Judges one candidate for the whole `statement`, with no dependency
    /// context. `None` when no verdict could be obtained.
    pub async fn check_candidate(&self, statement: &str, code: &str) -> Option<AlignmentVerdict> {
        let body = split_imports(code).1;
        let recovered = self
            .ask(prompts::back_translation(statement, &body, &[]))
            .await?;
        let reply = self
            .ask(prompts::semantic_check(statement, &recovered))
            .await?;
        match parse_verdict(&reply) {
            Ok(verdict) => Some(verdict),
            Err(err) => {
                warn!(error = %err, "unreadable precheck verdict");
                None
            }
        }
    }

    /// One `(description, text)` segment per synthesized concept, in build
    /// order. Each prompt sees its direct dependencies' meanings.
    async fn back_translate(
        &self,
        graph: &ConceptGraph,
    ) -> Result<Vec<(String, String)>, CoreError> {
        let mut translated: HashMap<ConceptId, String> = HashMap::new();
        let mut segments = Vec::new();

        for id in build_order(graph)? {
            let node = graph.get(id)?;
            if node.status() != NodeStatus::Synthesized {
                continue;
            }
            let code = split_imports(node.synthesized_code().unwrap_or_default()).1;

            let mut context = Vec::new();
            for dep in graph.dependencies(id) {
                let dep_node = graph.get(dep)?;
                if let Some(text) = translated.get(&dep) {
                    context.push((dep_node.description().to_string(), text.clone()));
                } else if let Some(reference) = dep_node.resolved_reference() {
                    context.push((
                        dep_node.description().to_string(),
                        format!("the Mathlib concept `{}`", reference.canonical_id),
                    ));
                }
            }

            let messages = prompts::back_translation(node.description(), &code, &context);
            match self.ask(messages).await {
                Some(text) => {
                    translated.insert(id, text.clone());
                    segments.push((node.description().to_string(), text));
                }
                None => warn!(concept = id.0, "back-translation skipped"),
            }
        }
        Ok(segments)
    }

    async fn ask(&self, messages: Vec<ChatMessage>) -> Option<String> {
        match bounded(
            "model",
            self.config.call_timeout(),
            self.model.complete(&messages, &self.options),
        )
        .await
        {
            Ok(reply) if !reply.trim().is_empty() => Some(reply.trim().to_string()),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "alignment call failed");
                None
            }
        }
    }
}

fn parse_verdict(reply: &str) -> Result<AlignmentVerdict, CollaboratorError> {
    extract_json_object(reply).and_then(|value| {
        serde_json::from_value::<AlignmentVerdict>(value)
            .map_err(|err| CollaboratorError::malformed("model", err.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use formalizer_agent::test_support::ScriptedModel;

    fn synthesized_pair() -> ConceptGraph {
        let mut graph = ConceptGraph::new("double of one is two");
        let root = graph.root();
        let double = graph.add_concept(root, "double").unwrap();
        graph.mark_to_synthesize(double, None).unwrap();
        graph.mark_to_synthesize(root, None).unwrap();
        graph.begin_attempt(double, 16).unwrap();
        graph
            .mark_synthesized(double, "def double (n : ℕ) : ℕ := 2 * n".into())
            .unwrap();
        graph.begin_attempt(root, 16).unwrap();
        graph
            .mark_synthesized(root, "theorem double_one : double 1 = 2 := rfl".into())
            .unwrap();
        graph
    }

    fn aligner(model: Arc<ScriptedModel>) -> SemanticAligner {
        SemanticAligner::new(model, RunConfig::default(), CompletionOptions::default())
    }

    #[tokio::test]
    async fn consistent_verdict_is_parsed() {
        let model = Arc::new(
            ScriptedModel::new()
                .on("Concept it was written for: double of one", ["double applied to 1 equals 2"])
                .on("Concept it was written for: double", ["the function n ↦ 2n"])
                .on("Merge these", ["Let double(n) = 2n. Then double(1) = 2."])
                .on(
                    "Compare the original",
                    [r#"```json
{"consistency_level": "level_1", "discrepancies": [], "recommendations": []}
```"#],
                ),
        );

        let verdict = aligner(model.clone())
            .align(&synthesized_pair(), "double of one is two")
            .await
            .unwrap();

        assert_eq!(verdict.consistency_level, ConsistencyLevel::Level1);
        assert!(verdict.is_consistent());

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[1].contains("- double: the function n ↦ 2n"));
        assert!(prompts[2].contains("--- Segment: double ---"));
    }

    #[tokio::test]
    async fn malformed_verdict_counts_as_inconsistent() {
        let model = Arc::new(
            ScriptedModel::new()
                .on("Translate this Lean 4", ["some statement"])
                .on("Merge these", ["merged"])
                .on("Compare the original", ["looks fine to me"]),
        );
        let verdict = aligner(model)
            .align(&synthesized_pair(), "double of one is two")
            .await
            .unwrap();
        assert_eq!(verdict.consistency_level, ConsistencyLevel::Level3);
        assert!(!verdict.is_consistent());
    }

    #[tokio::test]
    async fn unavailable_model_counts_as_inconsistent() {
        let model = Arc::new(ScriptedModel::new().on_error(
            "Lean",
            CollaboratorError::unavailable("model", "connection reset"),
        ));
        let verdict = aligner(model)
            .align(&synthesized_pair(), "double of one is two")
            .await
            .unwrap();
        assert_eq!(verdict.consistency_level, ConsistencyLevel::Level3);
        assert_eq!(verdict.discrepancies, ["no back-translation available"]);
    }

    #[tokio::test]
    async fn candidate_check_reads_the_verdict() {
        let model = Arc::new(
            ScriptedModel::new()
                .on("Translate this Lean 4", ["1 + 1 = 3"])
                .on(
                    "Compare the original",
                    [r#"{"consistency_level": "level_3", "discrepancies": ["claims 3, not 2"]}"#],
                ),
        );
        let verdict = aligner(model.clone())
            .check_candidate("one plus one is two", "import Mathlib\ntheorem t : 1 + 1 = 3 := sorry")
            .await
            .unwrap();
        assert_eq!(verdict.discrepancies, ["claims 3, not 2"]);

        let prompts = model.prompts();
        assert!(prompts[0].contains("(no dependencies)"));
        assert!(!prompts[0].contains("import Mathlib"));
        assert!(prompts[1].contains("Recovered:\n1 + 1 = 3"));
    }

    #[tokio::test]
    async fn candidate_check_without_a_verdict_is_none() {
        let model = Arc::new(
            ScriptedModel::new()
                .on("Translate this Lean 4", ["1 + 1 = 2"])
                .on("Compare the original", ["they match"]),
        );
        let verdict = aligner(model)
            .check_candidate("one plus one is two", "theorem t : 1 + 1 = 2 := rfl")
            .await;
        assert!(verdict.is_none());
    }

    #[test]
    fn levels_use_wire_names() {
        let verdict: AlignmentVerdict =
            serde_json::from_str(r#"{"consistency_level": "level_2"}"#).unwrap();
        assert_eq!(verdict.consistency_level, ConsistencyLevel::Level2);
        assert!(verdict.is_consistent());
        assert!(verdict.discrepancies.is_empty());
    }
}
