//! Validation of raw model text at the collaborator boundary.
//!
//! Models wrap code in markdown fences, echo dependency context back, and
//! return lists in whatever syntax they like. Everything here turns that
//! text into typed values or a [`CollaboratorError::Malformed`].

use formalizer_core::CollaboratorError;
use serde::Deserialize;
use serde_json::Value;

const COLLABORATOR: &str = "model";
const DEPENDENCY_ECHO_MARKERS: [&str; 2] = ["-- [Dep]", "--[Dep]"];

/// Extracts a code candidate from a model reply.
///
/// Prefers a ```` ```lean ```` fence, then any fence, then the raw text.
/// Output is cut at the first dependency-echo marker line.
pub fn extract_code(raw: &str) -> String {
    let body = fenced_block(raw, "```lean")
        .or_else(|| fenced_block(raw, "```"))
        .unwrap_or_else(|| raw.trim().trim_matches('`').to_string());

    let mut kept = Vec::new();
    for line in body.lines() {
        if DEPENDENCY_ECHO_MARKERS.iter().any(|m| line.contains(m)) {
            break;
        }
        kept.push(line);
    }
    kept.join("\n").trim().to_string()
}

fn fenced_block(raw: &str, opener: &str) -> Option<String> {
    let start = raw.find(opener)? + opener.len();
    let rest = &raw[start..];

    // Drop the info string (`lean`, `lean4`, `python`, ...) on the fence line.
    let rest = match rest.find('\n') {
        Some(nl) if !rest[..nl].trim().contains(' ') => &rest[nl + 1..],
        Some(_) => rest,
        None => return None,
    };

    let end = rest.find("```").unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

/// Splits a candidate into its `import` lines and the remaining body.
pub fn split_imports(code: &str) -> (Vec<String>, String) {
    let mut imports = Vec::new();
    let mut body = Vec::new();
    for line in code.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("import ") {
            if !imports.iter().any(|i: &String| i == trimmed) {
                imports.push(trimmed.to_string());
            }
        } else {
            body.push(line);
        }
    }
    (imports, body.join("\n").trim().to_string())
}

/// A parsed decomposition proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decomposition {
    pub sub_concepts: Vec<String>,
    pub statement_shape: Option<String>,
}

#[derive(Deserialize)]
struct DecompositionObject {
    #[serde(default)]
    sub_concepts: Vec<String>,
    #[serde(default)]
    statement_shape: Option<String>,
}

/// Parses a decomposition reply.
///
/// Accepts a JSON object with `sub_concepts` and `statement_shape`, a JSON
/// array of strings, or a single-quoted list literal. Blank entries are
/// dropped.
pub fn parse_decomposition(raw: &str) -> Result<Decomposition, CollaboratorError> {
    let text = extract_code(raw);
    let text = text.trim();

    let parsed = if text.starts_with('{') {
        serde_json::from_str::<DecompositionObject>(text)
            .map(|obj| Decomposition {
                sub_concepts: obj.sub_concepts,
                statement_shape: obj.statement_shape,
            })
            .map_err(|err| {
                CollaboratorError::malformed(COLLABORATOR, format!("decomposition object: {}", err))
            })?
    } else if text.starts_with('[') {
        let sub_concepts = match serde_json::from_str::<Vec<Value>>(text) {
            Ok(values) => values
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    other => Err(CollaboratorError::malformed(
                        COLLABORATOR,
                        format!("decomposition entry is not a string: {}", other),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Err(_) => parse_quoted_list(text)?,
        };
        Decomposition {
            sub_concepts,
            statement_shape: None,
        }
    } else {
        return Err(CollaboratorError::malformed(
            COLLABORATOR,
            "decomposition is neither an object nor a list",
        ));
    };

    Ok(Decomposition {
        sub_concepts: parsed
            .sub_concepts
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        statement_shape: parsed
            .statement_shape
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    })
}

/// Parses `['a', "b", 'c\'s']` style list literals.
fn parse_quoted_list(text: &str) -> Result<Vec<String>, CollaboratorError> {
    let malformed = |reason: &str| CollaboratorError::malformed(COLLABORATOR, reason.to_string());

    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| malformed("unterminated list"))?;

    let mut items = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let quote = match chars.next() {
            None => break,
            Some(q @ ('\'' | '"')) => q,
            Some(_) => return Err(malformed("list entries must be quoted strings")),
        };

        let mut item = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        item.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                }
                c if c == quote => {
                    closed = true;
                    break;
                }
                c => item.push(c),
            }
        }
        if !closed {
            return Err(malformed("unterminated string in list"));
        }
        items.push(item);

        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(_) => return Err(malformed("expected ',' between list entries")),
        }
    }
    Ok(items)
}

/// Answer to a grounding confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Found(String),
    NoMatch,
}

/// Parses `FOUND: <id>` / `NO_MATCH`. Anything else counts as no match.
///
/// When the model lists several ids, the first one is taken.
pub fn parse_confirmation(raw: &str) -> Confirmation {
    let text = raw.trim();
    let Some(rest) = text.strip_prefix("FOUND:") else {
        return Confirmation::NoMatch;
    };

    let first = rest
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_start_matches('[')
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| matches!(c, '\'' | '"' | '`' | ']'))
        .trim();

    if first.is_empty() {
        Confirmation::NoMatch
    } else {
        Confirmation::Found(first.to_string())
    }
}

/// Extracts a JSON object from a reply that may wrap it in a fence or prose.
pub fn extract_json_object(raw: &str) -> Result<Value, CollaboratorError> {
    let text = extract_code(raw);
    let start = text.find('{');
    let end = text.rfind('}');
    let slice = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => {
            return Err(CollaboratorError::malformed(
                COLLABORATOR,
                "reply does not contain a JSON object",
            ))
        }
    };
    serde_json::from_str(slice)
        .map_err(|err| CollaboratorError::malformed(COLLABORATOR, format!("invalid JSON: {}", err)))
}
