//! Compiler diagnostics and the parser for Lean's text output.
//!
//! Lean reports problems as `<file>:<line>:<col>: <severity>: <message>`,
//! with the message continuing on following lines until the next header.
//! [`parse_lean_output`] turns that stream into [`Diagnostic`] values.
//! [`condense`] renders error diagnostics into the short text fed back to
//! the model on retry.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// 1-based position inside the compiled file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

/// One compiler message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            location: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{}:{}: {}: {}",
                loc.line,
                loc.column,
                self.severity.as_str(),
                self.message
            ),
            None => write!(f, "{}: {}", self.severity.as_str(), self.message),
        }
    }
}

const SEVERITIES: [(&str, Severity); 3] = [
    (": error:", Severity::Error),
    (": warning:", Severity::Warning),
    (": info:", Severity::Info),
];

/// Parses Lean's combined stdout/stderr into diagnostics.
///
/// Lines before the first recognized header are dropped. Bare
/// `error: ...` lines (no location) are kept as unlocated errors.
pub fn parse_lean_output(output: &str) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    for line in output.lines() {
        if let Some(diag) = parse_header(line) {
            diagnostics.push(diag);
            continue;
        }
        if let Some(rest) = line.strip_prefix("error:") {
            diagnostics.push(Diagnostic::error(rest.trim()));
            continue;
        }
        if let Some(last) = diagnostics.last_mut() {
            if !line.trim().is_empty() {
                last.message.push('\n');
                last.message.push_str(line.trim_end());
            }
        }
    }

    diagnostics
}

fn parse_header(line: &str) -> Option<Diagnostic> {
    for (marker, severity) in SEVERITIES {
        let Some(pos) = line.find(marker) else {
            continue;
        };
        let prefix = &line[..pos];
        let mut parts = prefix.rsplitn(3, ':');
        let column = parts.next()?.trim().parse::<u32>().ok()?;
        let line_no = parts.next()?.trim().parse::<u32>().ok()?;
        // The file path must be present, even if we ignore it.
        parts.next()?;

        return Some(Diagnostic {
            severity,
            message: line[pos + marker.len()..].trim().to_string(),
            location: Some(SourceLocation {
                line: line_no,
                column,
            }),
        });
    }
    None
}

/// Returns the text after the first `error:` marker, or the whole text.
pub fn trim_to_error(raw: &str) -> &str {
    match raw.find("error:") {
        Some(pos) => raw[pos + "error:".len()..].trim(),
        None => raw.trim(),
    }
}

/// Truncates `text` to at most `limit` characters, on a char boundary.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Renders the error diagnostics as feedback text of at most `limit`
/// characters (plus an ellipsis when cut).
///
/// Falls back to every diagnostic when none is an error.
pub fn condense(diagnostics: &[Diagnostic], limit: usize) -> String {
    let errors: Vec<&Diagnostic> = diagnostics.iter().filter(|d| d.is_error()).collect();
    let chosen: Vec<&Diagnostic> = if errors.is_empty() {
        diagnostics.iter().collect()
    } else {
        errors
    };

    let text = chosen
        .iter()
        .map(|d| match d.location {
            Some(loc) => format!("line {}: {}", loc.line, d.message),
            None => d.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n");

    truncate_chars(&text, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "\
/tmp/.tmpA1b2/Attempt.lean:4:8: error: type mismatch
  h
has type
  Nat : Type
but is expected to have type
  Int : Type
/tmp/.tmpA1b2/Attempt.lean:9:0: warning: declaration uses 'sorry'
";

    #[test]
    fn parses_headers_and_continuations() {
        let diags = parse_lean_output(SAMPLE);
        assert_eq!(diags.len(), 2);

        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].location, Some(SourceLocation { line: 4, column: 8 }));
        assert!(diags[0].message.starts_with("type mismatch\n  h\nhas type"));
        assert!(diags[0].message.ends_with("Int : Type"));

        assert_eq!(diags[1].severity, Severity::Warning);
        assert_eq!(diags[1].message, "declaration uses 'sorry'");
    }

    #[test]
    fn bare_error_lines_have_no_location() {
        let diags = parse_lean_output("error: unknown package 'Mathlib'\n");
        assert_eq!(diags, vec![Diagnostic::error("unknown package 'Mathlib'")]);
        assert_eq!(diags[0].to_string(), "error: unknown package 'Mathlib'");
    }

    #[test]
    fn noise_before_first_header_is_dropped() {
        let diags = parse_lean_output("building...\nok\nA.lean:1:2: info: done\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].to_string(), "1:2: info: done");
    }

    #[test]
    fn trim_to_error_cuts_prefix() {
        assert_eq!(
            trim_to_error("Attempt.lean:3:1: error: unknown identifier 'foo'"),
            "unknown identifier 'foo'"
        );
        assert_eq!(trim_to_error("  plain text "), "plain text");
    }

    #[test]
    fn condense_prefers_errors_and_truncates() {
        let diags = parse_lean_output(SAMPLE);
        let text = condense(&diags, 500);
        assert!(text.starts_with("line 4: type mismatch"));
        assert!(!text.contains("sorry"));

        let short = condense(&diags, 10);
        assert_eq!(short, "line 4: ty...");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("αβγδ", 2), "αβ...");
        assert_eq!(truncate_chars("αβ", 2), "αβ");
    }

    proptest! {
        #[test]
        fn parser_never_panics(input in "\\PC*") {
            let _ = parse_lean_output(&input);
        }

        #[test]
        fn condense_respects_limit(msg in "[a-z ]{0,200}", limit in 1usize..100) {
            let diags = vec![Diagnostic::error(msg)];
            let text = condense(&diags, limit);
            prop_assert!(text.chars().count() <= limit + 3);
        }
    }
}
