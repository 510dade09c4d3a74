//! End-to-end formalization of one statement.
//!
//! [`Formalizer`] wires the three collaborators into the Stage 1 builder,
//! the Stage 2 engine, the assembler and (optionally) the aligner. One call
//! to [`Formalizer::formalize`] is one run: it always yields an artifact
//! unless a graph invariant breaks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use formalizer_agent::{CompletionOptions, ConceptSearch, GraphBuilder, LanguageModel, LlmConfig};
use formalizer_check::Compiler;
use formalizer_core::{ConceptGraph, RunConfig};
use tracing::info;

use crate::alignment::SemanticAligner;
use crate::assembler::assemble;
use crate::error::PipelineError;
use crate::report::RunReport;
use crate::synthesis::{SynthesisEngine, SynthesisOptions};

/// Sampling options per pipeline phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelOptions {
    pub planning: CompletionOptions,
    pub synthesis: SynthesisOptions,
    pub alignment: CompletionOptions,
}

impl ModelOptions {
    /// Strict sampling everywhere except first synthesis attempts.
    pub fn from_llm(config: &LlmConfig) -> Self {
        ModelOptions {
            planning: config.strict(),
            synthesis: SynthesisOptions {
                first_attempt: config.creative(),
                repair: config.strict(),
            },
            alignment: config.strict(),
        }
    }
}

/// Everything one run produced.
#[derive(Debug)]
pub struct RunOutput {
    pub graph: ConceptGraph,
    pub artifact: String,
    pub report: RunReport,
}

impl RunOutput {
    /// Writes `<stem>.lean` and `<stem>_report.json` under `dir`.
    pub fn write_to(&self, dir: &Path, stem: &str) -> Result<(PathBuf, PathBuf), PipelineError> {
        std::fs::create_dir_all(dir)?;
        let artifact_path = dir.join(format!("{}.lean", stem));
        let report_path = dir.join(format!("{}_report.json", stem));
        std::fs::write(&artifact_path, &self.artifact)?;
        std::fs::write(&report_path, serde_json::to_string_pretty(&self.report)?)?;
        Ok((artifact_path, report_path))
    }
}

pub struct Formalizer {
    builder: GraphBuilder,
    engine: SynthesisEngine,
    aligner: SemanticAligner,
    config: RunConfig,
}

impl Formalizer {
    /// Validates `config` and wires the drivers.
    pub fn new(
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn ConceptSearch>,
        compiler: Arc<dyn Compiler>,
        config: RunConfig,
        options: ModelOptions,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Formalizer {
            builder: GraphBuilder::new(search, model.clone(), config.clone(), options.planning),
            engine: SynthesisEngine::new(
                model.clone(),
                compiler,
                config.clone(),
                options.synthesis,
            ),
            aligner: SemanticAligner::new(model, config.clone(), options.alignment),
            config,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs both stages, assembles the artifact, and reports.
    pub async fn formalize(&self, statement: &str) -> Result<RunOutput, PipelineError> {
        let started = Instant::now();
        info!(statement, "formalization started");

        let mut graph = self.builder.build(statement).await?;
        self.engine.run(&mut graph).await?;
        let artifact = assemble(&graph, &self.config.synthesis)?;

        let alignment = if self.config.alignment.enabled {
            Some(self.aligner.align(&graph, statement).await?)
        } else {
            None
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let report = RunReport::new(statement, &graph, &artifact, alignment, elapsed_ms);
        info!(
            concepts = report.counts.total,
            synthesized = report.counts.synthesized,
            failed = report.counts.failed,
            elapsed_ms,
            "formalization finished"
        );
        Ok(RunOutput {
            graph,
            artifact,
            report,
        })
    }
}
