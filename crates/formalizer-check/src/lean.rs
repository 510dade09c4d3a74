//! `lake env lean` subprocess adapter.
//!
//! Each check writes the rendered unit into a fresh temporary directory and
//! elaborates it from inside the configured Lake project, so Mathlib and
//! the project's other packages resolve. Attempts never share a file.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use formalizer_core::CollaboratorError;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use crate::compiler::{CompilationUnit, CompileOutcome, Compiler};
use crate::diagnostics::{parse_lean_output, truncate_chars, Diagnostic, Severity};

const COLLABORATOR: &str = "compiler";
const FILE_NAME: &str = "Attempt.lean";

/// Where to find Lean and how long to wait for it.
#[derive(Debug, Clone, PartialEq)]
pub struct LeanConfig {
    /// Lake project with Mathlib in its manifest.
    pub sandbox_path: PathBuf,
    pub lake_path: PathBuf,
    pub lean_path: PathBuf,
    pub timeout: Duration,
}

impl Default for LeanConfig {
    fn default() -> Self {
        LeanConfig {
            sandbox_path: PathBuf::from("."),
            lake_path: PathBuf::from("lake"),
            lean_path: PathBuf::from("lean"),
            timeout: Duration::from_secs(120),
        }
    }
}

pub struct LeanCompiler {
    config: LeanConfig,
}

impl LeanCompiler {
    pub fn new(config: LeanConfig) -> Self {
        LeanCompiler { config }
    }

    pub fn config(&self) -> &LeanConfig {
        &self.config
    }

    fn interpret(&self, success: bool, stdout: &str, stderr: &str) -> CompileOutcome {
        let mut combined = String::with_capacity(stdout.len() + stderr.len() + 1);
        combined.push_str(stdout);
        if !stdout.is_empty() && !stdout.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(stderr);

        let diagnostics = parse_lean_output(&combined);

        if success && !diagnostics.iter().any(Diagnostic::is_error) {
            let warnings = diagnostics
                .into_iter()
                .filter(|d| d.severity == Severity::Warning)
                .collect();
            return CompileOutcome::Success { warnings };
        }

        let errors: Vec<Diagnostic> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
        if errors.is_empty() {
            let raw = combined.trim();
            let message = if raw.is_empty() {
                "compiler exited with a failure status and no output".to_string()
            } else {
                truncate_chars(raw, 2000)
            };
            return CompileOutcome::Failure {
                diagnostics: vec![Diagnostic::error(message)],
            };
        }
        CompileOutcome::Failure {
            diagnostics: errors,
        }
    }
}

#[async_trait]
impl Compiler for LeanCompiler {
    async fn check(&self, unit: &CompilationUnit) -> Result<CompileOutcome, CollaboratorError> {
        let start = Instant::now();

        let scratch = TempDir::new().map_err(|e| {
            CollaboratorError::unavailable(COLLABORATOR, format!("failed to create temp dir: {e}"))
        })?;
        let file = scratch.path().join(FILE_NAME);
        tokio::fs::write(&file, unit.render()).await.map_err(|e| {
            CollaboratorError::unavailable(COLLABORATOR, format!("failed to write {FILE_NAME}: {e}"))
        })?;

        let mut cmd = Command::new(&self.config.lake_path);
        cmd.arg("env")
            .arg(&self.config.lean_path)
            .arg(&file)
            .current_dir(&self.config.sandbox_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.config.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CollaboratorError::unavailable(
                    COLLABORATOR,
                    format!("failed to run {}: {e}", self.config.lake_path.display()),
                ))
            }
            Err(_) => {
                return Err(CollaboratorError::Timeout {
                    collaborator: COLLABORATOR,
                    seconds: self.config.timeout.as_secs(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "lean stdout: {}", stdout);
        debug!("lean stderr: {}", stderr);

        Ok(self.interpret(output.status.success(), &stdout, &stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> LeanCompiler {
        LeanCompiler::new(LeanConfig::default())
    }

    #[test]
    fn clean_exit_is_success() {
        let outcome = compiler().interpret(true, "", "");
        assert_eq!(outcome, CompileOutcome::Success { warnings: vec![] });
    }

    #[test]
    fn warnings_survive_success() {
        let outcome = compiler().interpret(
            true,
            "/tmp/x/Attempt.lean:3:0: warning: declaration uses 'sorry'\n",
            "",
        );
        assert!(outcome.is_success());
        assert_eq!(outcome.diagnostics().len(), 1);
    }

    #[test]
    fn errors_make_failure_even_with_zero_exit() {
        let outcome = compiler().interpret(
            true,
            "/tmp/x/Attempt.lean:3:4: error: unknown identifier 'foo'",
            "",
        );
        assert!(!outcome.is_success());
        assert_eq!(outcome.diagnostics()[0].message, "unknown identifier 'foo'");
    }

    #[test]
    fn unstructured_failure_keeps_raw_output() {
        let outcome = compiler().interpret(false, "", "uncaught exception: bad import\n");
        match outcome {
            CompileOutcome::Failure { diagnostics } => {
                assert_eq!(diagnostics.len(), 1);
                assert_eq!(diagnostics[0].message, "uncaught exception: bad import");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_lake_is_unavailable() {
        let lean = LeanCompiler::new(LeanConfig {
            lake_path: PathBuf::from("/nonexistent/formalizer-test/lake"),
            sandbox_path: std::env::temp_dir(),
            ..LeanConfig::default()
        });
        let unit = CompilationUnit::new(vec![], vec![], "def x := 1".into());

        let err = lean.check(&unit).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable { .. }));
        assert_eq!(err.collaborator(), "compiler");
    }
}
