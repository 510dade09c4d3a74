//! A scripted compiler for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use formalizer_core::CollaboratorError;

use crate::compiler::{CompilationUnit, CompileOutcome, Compiler};
use crate::diagnostics::Diagnostic;

/// Replays queued outcomes, then falls back to substring rules.
///
/// A unit whose candidate contains a rule's needle fails with that rule's
/// diagnostic. Anything else compiles. Every check first waits `latency`.
#[derive(Default)]
pub struct ScriptedCompiler {
    latency: Duration,
    queue: Mutex<VecDeque<Result<CompileOutcome, CollaboratorError>>>,
    rules: Vec<(String, String)>,
    units: Mutex<Vec<CompilationUnit>>,
}

impl ScriptedCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fail_when(mut self, needle: &str, diagnostic: &str) -> Self {
        self.rules.push((needle.to_string(), diagnostic.to_string()));
        self
    }

    pub fn then_fail(self, diagnostic: &str) -> Self {
        self.push(Ok(CompileOutcome::Failure {
            diagnostics: vec![Diagnostic::error(diagnostic)],
        }))
    }

    pub fn then_succeed(self) -> Self {
        self.push(Ok(CompileOutcome::Success {
            warnings: Vec::new(),
        }))
    }

    pub fn then_error(self, error: CollaboratorError) -> Self {
        self.push(Err(error))
    }

    fn push(self, outcome: Result<CompileOutcome, CollaboratorError>) -> Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(outcome);
        }
        self
    }

    /// Every unit checked so far.
    pub fn units(&self) -> Vec<CompilationUnit> {
        self.units.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Compiler for ScriptedCompiler {
    async fn check(&self, unit: &CompilationUnit) -> Result<CompileOutcome, CollaboratorError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Ok(mut units) = self.units.lock() {
            units.push(unit.clone());
        }
        if let Some(outcome) = self.queue.lock().ok().and_then(|mut q| q.pop_front()) {
            return outcome;
        }
        for (needle, diagnostic) in &self.rules {
            if unit.candidate.contains(needle.as_str()) {
                return Ok(CompileOutcome::Failure {
                    diagnostics: vec![Diagnostic::error(diagnostic.clone())],
                });
            }
        }
        Ok(CompileOutcome::Success {
            warnings: Vec::new(),
        })
    }
}
