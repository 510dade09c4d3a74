//! The compiler collaborator contract.
//!
//! A [`CompilationUnit`] is everything one attempt submits: the import
//! header, the already-synthesized dependency code, and the candidate.
//! Implementations of [`Compiler`] decide success or failure; they never
//! touch the concept graph.

use async_trait::async_trait;
use formalizer_core::CollaboratorError;
use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostic;

/// Source submitted for one compile attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationUnit {
    pub imports: Vec<String>,
    /// Synthesized code of transitive dependencies, dependencies first.
    pub dependencies: Vec<String>,
    pub candidate: String,
}

impl CompilationUnit {
    pub fn new(imports: Vec<String>, dependencies: Vec<String>, candidate: String) -> Self {
        CompilationUnit {
            imports,
            dependencies,
            candidate,
        }
    }

    /// Renders the full source file: deduplicated imports, then each
    /// dependency block, then the candidate.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut seen: Vec<&str> = Vec::new();
        for import in &self.imports {
            let import = import.trim();
            if !import.is_empty() && !seen.contains(&import) {
                seen.push(import);
                out.push_str(import);
                out.push('\n');
            }
        }
        if !seen.is_empty() {
            out.push('\n');
        }
        for block in &self.dependencies {
            out.push_str(block.trim_end());
            out.push_str("\n\n");
        }
        out.push_str(self.candidate.trim_end());
        out.push('\n');
        out
    }
}

/// Result of checking one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompileOutcome {
    Success { warnings: Vec<Diagnostic> },
    Failure { diagnostics: Vec<Diagnostic> },
}

impl CompileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CompileOutcome::Success { .. })
    }

    /// Warnings on success, errors (and anything else reported) on failure.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileOutcome::Success { warnings } => warnings,
            CompileOutcome::Failure { diagnostics } => diagnostics,
        }
    }
}

/// Checks formal source for well-formedness.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn check(&self, unit: &CompilationUnit) -> Result<CompileOutcome, CollaboratorError>;
}
