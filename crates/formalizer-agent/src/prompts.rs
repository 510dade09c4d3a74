//! Prompt builders for every model call.
//!
//! Builders are pure: the same inputs always produce the same messages, so
//! tests can assert on exact prompt text. The adapter adds the system
//! prompt.

use serde::Serialize;

use crate::llm_provider::ChatMessage;
use crate::search::SearchHit;

/// What a synthesis prompt knows about one dependency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyContext {
    pub description: String,
    /// Library name, for grounded dependencies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Compiled code, for synthesized dependencies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Feedback from the previous failed attempt, threaded into a retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairContext {
    pub attempt: u32,
    pub max_attempts: u32,
    pub previous_candidate: String,
    pub diagnostics: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub description: &'a str,
    pub statement_shape: Option<&'a str>,
    pub dependencies: &'a [DependencyContext],
    pub repair: Option<&'a RepairContext>,
}

pub fn grounding_confirmation(description: &str, candidates: &[SearchHit]) -> Vec<ChatMessage> {
    let candidates_text = if candidates.is_empty() {
        "(no candidates)".to_string()
    } else {
        candidates
            .iter()
            .map(|c| {
                format!(
                    "- {}: {}",
                    c.canonical_id,
                    c.informal_description.as_deref().unwrap_or("(no description)")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    vec![ChatMessage::user(format!(
        "Decide whether the concept below already exists in Mathlib.\n\
Concept: {description}\n\n\
Candidates from the search index:\n{candidates_text}\n\n\
Answer with exactly one line:\n\
- `FOUND: <name>` with the candidate's full name if one of them is the same concept;\n\
- `NO_MATCH` otherwise."
    ))]
}

pub fn decomposition(description: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Decompose the mathematical concept below for formalization in Lean 4 with Mathlib.\n\
Concept: {description}\n\n\
List the prerequisite concepts that must be defined first. Only list concepts \
that are strictly needed and not trivially part of Mathlib's core vocabulary. \
Return an empty list when the concept is atomic.\n\n\
Return only JSON with no surrounding text, in this shape:\n\
{{\"sub_concepts\": [\"...\"], \"statement_shape\": \"<Lean signature of this concept, or null>\"}}"
    ))]
}

pub fn synthesis(request: &SynthesisRequest<'_>) -> Vec<ChatMessage> {
    let mut prompt = String::new();
    prompt.push_str("Write Lean 4 code (Mathlib available) that formalizes the concept below.\n");
    prompt.push_str(&format!("Concept: {}\n", request.description));
    if let Some(shape) = request.statement_shape {
        prompt.push_str(&format!("Expected statement shape: {}\n", shape));
    }

    let code_blocks: Vec<String> = request
        .dependencies
        .iter()
        .filter_map(|d| {
            d.code
                .as_ref()
                .map(|code| format!("-- [Dep] {}\n{}", d.description, code.trim()))
        })
        .collect();
    if !code_blocks.is_empty() {
        prompt.push_str("\nAlready compiled definitions you may use (do not repeat them):\n");
        prompt.push_str(&code_blocks.join("\n\n"));
        prompt.push('\n');
    }

    let references: Vec<String> = request
        .dependencies
        .iter()
        .filter_map(|d| {
            d.reference
                .as_ref()
                .map(|r| format!("- {} corresponds to: {}", d.description, r))
        })
        .collect();
    if !references.is_empty() {
        prompt.push_str("\nGrounded references available:\n");
        prompt.push_str(&references.join("\n"));
        prompt.push('\n');
    }

    if let Some(repair) = request.repair {
        let repair_block = serde_json::to_string_pretty(repair).unwrap_or_default();
        prompt.push_str("\nThe previous attempt did not compile. Fix the reported problems.\n");
        prompt.push_str(&format!("Latest compiler diagnostics:\n{}\n", repair_block));
    }

    prompt.push_str(
        "\nReturn only the new Lean code for this concept in a single ```lean block. \
Do not restate the definitions listed above.",
    );

    vec![ChatMessage::user(prompt)]
}

pub fn back_translation(
    description: &str,
    code: &str,
    dependency_context: &[(String, String)],
) -> Vec<ChatMessage> {
    let context = if dependency_context.is_empty() {
        "(no dependencies)".to_string()
    } else {
        dependency_context
            .iter()
            .map(|(name, text)| format!("- {}: {}", name, text))
            .collect::<Vec<_>>()
            .join("\n")
    };

    vec![ChatMessage::user(format!(
        "Translate this Lean 4 code back into precise natural-language mathematics.\n\
Concept it was written for: {description}\n\n\
Meaning of its dependencies:\n{context}\n\n\
```lean\n{code}\n```\n\n\
Describe only what the code states, not what it was meant to state."
    ))]
}

pub fn merge_back_translations(segments: &[(String, String)]) -> Vec<ChatMessage> {
    let segments_text = segments
        .iter()
        .map(|(name, text)| format!("--- Segment: {} ---\n{}\n", name, text))
        .collect::<Vec<_>>()
        .join("\n");

    vec![ChatMessage::user(format!(
        "Merge these natural-language segments, listed dependencies first, into one \
self-contained mathematical statement:\n\n{segments_text}"
    ))]
}

pub fn semantic_check(original: &str, back_translated: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Compare the original problem with the statement recovered from its formalization.\n\n\
Original:\n{original}\n\n\
Recovered:\n{back_translated}\n\n\
Return only JSON with no surrounding text:\n\
{{\"consistency_level\": \"level_1\" | \"level_2\" | \"level_3\", \
\"discrepancies\": [\"...\"], \"recommendations\": [\"...\"]}}\n\
level_1: equivalent; level_2: minor differences that keep the meaning; \
level_3: the meaning differs."
    ))]
}
