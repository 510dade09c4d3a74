//! Compiler collaborator: the [`Compiler`] contract, Lean diagnostics, and
//! the `lake env lean` subprocess adapter.

pub mod compiler;
pub mod diagnostics;
pub mod lean;

pub use compiler::{CompilationUnit, CompileOutcome, Compiler};
pub use diagnostics::{condense, parse_lean_output, trim_to_error, Diagnostic, Severity, SourceLocation};
pub use lean::{LeanCompiler, LeanConfig};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
