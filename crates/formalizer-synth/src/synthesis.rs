//! Stage 2 driver: the compile-checked reflection loop.
//!
//! Concepts are visited in build order, so every synthesized dependency is
//! available as context and as compilable code before its dependents are
//! attempted. Each concept runs a bounded loop:
//!
//! ```text
//! begin_attempt -> prompt model -> extract candidate -> compile
//!      ^                                                   |
//!      +------------- diagnostics (on failure) ------------+
//! ```
//!
//! The loop ends with `Synthesized` on the first clean compile, or `Failed`
//! when the attempt budget, the collaborator retry budget, or the node time
//! budget runs out. A failed concept never stops the run.
//!
//! With `alignment.precheck_root` set, the root's first candidate is
//! back-translated and judged against the statement before compiling; a
//! `level_3` verdict rejects it and its discrepancies become the repair
//! feedback. No verdict means the candidate is compiled as usual.

use std::sync::Arc;

use formalizer_agent::call::bounded;
use formalizer_agent::prompts::{self, DependencyContext, RepairContext, SynthesisRequest};
use formalizer_agent::response::{extract_code, split_imports};
use formalizer_agent::{CompletionOptions, LanguageModel};
use formalizer_check::diagnostics::{condense, truncate_chars};
use formalizer_check::{CompilationUnit, CompileOutcome, Compiler};
use formalizer_core::{
    build_order, CollaboratorError, ConceptGraph, ConceptId, CoreError, NodeStatus, RunConfig,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::alignment::SemanticAligner;

const NO_CODE: &str = "model returned no code";
const NO_DIAGNOSTICS: &str = "compilation failed without diagnostics";

/// Sampling options for first attempts and for repairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SynthesisOptions {
    pub first_attempt: CompletionOptions,
    pub repair: CompletionOptions,
}

/// State carried between iterations of one concept's loop.
#[derive(Debug, Clone, Default)]
pub struct ReflectionContext {
    pub attempt: u32,
    pub previous_candidate: Option<String>,
    /// Feedback from the most recent failed attempt.
    pub last_feedback: Option<String>,
    pub consecutive_collaborator_errors: u32,
}

impl ReflectionContext {
    fn record_rejection(&mut self, candidate: String, feedback: String) {
        self.previous_candidate = Some(candidate);
        self.last_feedback = Some(feedback);
        self.consecutive_collaborator_errors = 0;
    }

    fn record_collaborator_error(&mut self, feedback: String) {
        self.last_feedback = Some(feedback);
        self.consecutive_collaborator_errors += 1;
    }

    fn repair(&self, max_attempts: u32) -> Option<RepairContext> {
        let diagnostics = self.last_feedback.clone()?;
        Some(RepairContext {
            attempt: self.attempt,
            max_attempts,
            previous_candidate: self.previous_candidate.clone().unwrap_or_default(),
            diagnostics,
        })
    }
}

/// What Stage 2 did, in build order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SynthesisSummary {
    pub synthesized: Vec<ConceptId>,
    pub failed: Vec<ConceptId>,
}

enum AttemptResult {
    Compiled(String),
    Rejected { candidate: String, feedback: String },
    CollaboratorFailed(String),
}

pub struct SynthesisEngine {
    model: Arc<dyn LanguageModel>,
    compiler: Arc<dyn Compiler>,
    aligner: SemanticAligner,
    config: RunConfig,
    options: SynthesisOptions,
}

impl SynthesisEngine {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        compiler: Arc<dyn Compiler>,
        config: RunConfig,
        options: SynthesisOptions,
    ) -> Self {
        SynthesisEngine {
            aligner: SemanticAligner::new(model.clone(), config.clone(), options.repair),
            model,
            compiler,
            config,
            options,
        }
    }

    /// Runs the reflection loop for every `ToSynthesize` concept.
    ///
    /// Fails only on graph invariant violations, including a graph that
    /// still holds `Pending` concepts.
    pub async fn run(&self, graph: &mut ConceptGraph) -> Result<SynthesisSummary, CoreError> {
        let order = build_order(graph)?;
        info!(targets = order.len(), "stage 2 started");

        let mut summary = SynthesisSummary::default();
        for id in order {
            if graph.get(id)?.status() != NodeStatus::ToSynthesize {
                continue;
            }
            if self.synthesize(graph, id).await? {
                summary.synthesized.push(id);
            } else {
                summary.failed.push(id);
            }
        }

        info!(
            synthesized = summary.synthesized.len(),
            failed = summary.failed.len(),
            "stage 2 finished"
        );
        Ok(summary)
    }

    /// Drives one concept to `Synthesized` (true) or `Failed` (false).
    async fn synthesize(&self, graph: &mut ConceptGraph, id: ConceptId) -> Result<bool, CoreError> {
        let max_attempts = self.config.synthesis.max_attempts;
        let started = Instant::now();
        let mut ctx = ReflectionContext::default();

        loop {
            if let Some(budget) = self.config.node_time_budget() {
                if ctx.attempt > 0 && started.elapsed() >= budget {
                    warn!(concept = id.0, attempts = ctx.attempt, "node time budget exhausted");
                    let reason = format!("time budget of {}s exhausted", budget.as_secs());
                    return self.fail(graph, id, &ctx, reason);
                }
            }

            ctx.attempt = match graph.begin_attempt(id, max_attempts) {
                Ok(attempt) => attempt,
                Err(CoreError::AttemptBudgetExhausted { .. }) => {
                    let reason = format!("no compiling candidate after {} attempt(s)", max_attempts);
                    return self.fail(graph, id, &ctx, reason);
                }
                Err(err) => return Err(err),
            };

            match self.attempt(graph, id, &ctx).await? {
                AttemptResult::Compiled(code) => {
                    graph.mark_synthesized(id, code)?;
                    info!(concept = id.0, attempts = ctx.attempt, "concept synthesized");
                    return Ok(true);
                }
                AttemptResult::Rejected { candidate, feedback } => {
                    debug!(concept = id.0, attempt = ctx.attempt, %feedback, "candidate rejected");
                    ctx.record_rejection(candidate, feedback);
                }
                AttemptResult::CollaboratorFailed(feedback) => {
                    warn!(concept = id.0, attempt = ctx.attempt, %feedback, "collaborator failed during attempt");
                    ctx.record_collaborator_error(feedback);
                    if ctx.consecutive_collaborator_errors
                        >= self.config.synthesis.collaborator_retry_budget
                    {
                        let reason = format!(
                            "{} consecutive collaborator failure(s)",
                            ctx.consecutive_collaborator_errors
                        );
                        return self.fail(graph, id, &ctx, reason);
                    }
                }
            }
        }
    }

    fn fail(
        &self,
        graph: &mut ConceptGraph,
        id: ConceptId,
        ctx: &ReflectionContext,
        reason: String,
    ) -> Result<bool, CoreError> {
        let diagnostics = match &ctx.last_feedback {
            Some(feedback) => vec![feedback.clone()],
            None => vec![reason.clone()],
        };
        graph.mark_failed(id, diagnostics)?;
        info!(concept = id.0, attempts = ctx.attempt, %reason, "concept failed");
        Ok(false)
    }

    /// One prompt-and-compile round.
    async fn attempt(
        &self,
        graph: &ConceptGraph,
        id: ConceptId,
        ctx: &ReflectionContext,
    ) -> Result<AttemptResult, CoreError> {
        let node = graph.get(id)?;
        let limit = self.config.synthesis.diagnostic_char_limit;
        let dependencies = dependency_context(graph, id)?;
        let repair = ctx.repair(self.config.synthesis.max_attempts);
        let messages = prompts::synthesis(&SynthesisRequest {
            description: node.description(),
            statement_shape: node.statement_shape(),
            dependencies: &dependencies,
            repair: repair.as_ref(),
        });
        let options = if repair.is_some() {
            self.options.repair
        } else {
            self.options.first_attempt
        };

        debug!(concept = id.0, attempt = ctx.attempt, prompt = %messages[0].content, "synthesis prompt");
        let reply = match bounded(
            "model",
            self.config.call_timeout(),
            self.model.complete(&messages, &options),
        )
        .await
        {
            Ok(reply) => reply,
            Err(err) => return Ok(AttemptResult::CollaboratorFailed(feedback_for(&err, limit))),
        };
        debug!(concept = id.0, attempt = ctx.attempt, %reply, "synthesis reply");

        let code = extract_code(&reply);
        if code.is_empty() {
            return Ok(AttemptResult::Rejected {
                candidate: String::new(),
                feedback: NO_CODE.to_string(),
            });
        }

        if self.config.alignment.precheck_root && id == graph.root() && ctx.attempt == 1 {
            if let Some(verdict) = self.aligner.check_candidate(node.description(), &code).await {
                if !verdict.is_consistent() {
                    warn!(concept = id.0, discrepancies = ?verdict.discrepancies, "root candidate failed the semantic precheck");
                    let feedback = format!(
                        "semantic check failed (level_3): {}",
                        verdict.discrepancies.join("; ")
                    );
                    return Ok(AttemptResult::Rejected {
                        candidate: code,
                        feedback: truncate_chars(&feedback, limit),
                    });
                }
            }
        }

        let unit = self.compilation_unit(graph, id, &code)?;
        let outcome = match bounded(
            "compiler",
            self.config.call_timeout(),
            self.compiler.check(&unit),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => return Ok(AttemptResult::CollaboratorFailed(feedback_for(&err, limit))),
        };

        Ok(match outcome {
            CompileOutcome::Success { .. } => AttemptResult::Compiled(code),
            CompileOutcome::Failure { diagnostics } => {
                debug!(concept = id.0, count = diagnostics.len(), "compiler diagnostics");
                let feedback = condense(&diagnostics, limit);
                AttemptResult::Rejected {
                    candidate: code,
                    feedback: if feedback.is_empty() {
                        NO_DIAGNOSTICS.to_string()
                    } else {
                        feedback
                    },
                }
            }
        })
    }

    /// Base imports, then imports hoisted from dependencies and the
    /// candidate; dependency bodies in topological order; candidate body.
    fn compilation_unit(
        &self,
        graph: &ConceptGraph,
        id: ConceptId,
        code: &str,
    ) -> Result<CompilationUnit, CoreError> {
        let mut imports = self.config.synthesis.base_imports.clone();
        let mut bodies = Vec::new();
        for dep in graph.transitive_dependencies(id) {
            if let Some(dep_code) = graph.get(dep)?.synthesized_code() {
                let (dep_imports, body) = split_imports(dep_code);
                imports.extend(dep_imports);
                bodies.push(body);
            }
        }
        let (own_imports, body) = split_imports(code);
        imports.extend(own_imports);
        Ok(CompilationUnit::new(imports, bodies, body))
    }
}

/// Grounded and synthesized transitive dependencies, dependencies first.
fn dependency_context(
    graph: &ConceptGraph,
    id: ConceptId,
) -> Result<Vec<DependencyContext>, CoreError> {
    let mut context = Vec::new();
    for dep in graph.transitive_dependencies(id) {
        let node = graph.get(dep)?;
        let reference = node.resolved_reference().map(|r| r.canonical_id.clone());
        let code = node.synthesized_code().map(|c| split_imports(c).1);
        if reference.is_some() || code.is_some() {
            context.push(DependencyContext {
                description: node.description().to_string(),
                reference,
                code,
            });
        }
    }
    Ok(context)
}

fn feedback_for(err: &CollaboratorError, limit: usize) -> String {
    truncate_chars(&err.to_string(), limit)
}
