//! Final artifact assembly.
//!
//! [`assemble`] is a pure function of the graph and the synthesis config:
//! no clocks, no hashing of pointers, no map iteration order. Assembling the
//! same graph twice yields byte-identical text.

use formalizer_agent::response::split_imports;
use formalizer_core::{
    resolved_order, ConceptGraph, ConceptNode, CoreError, NodeStatus, SynthesisConfig,
};

const RULE: &str = "-- ------------------------------";

/// Renders the single `.lean` artifact for a fully resolved graph.
///
/// Layout: the deduplicated import header, an optional comment block naming
/// grounded concepts, then one block per synthesized or failed concept in
/// build order. Failed concepts become comment-only placeholders, so the
/// artifact always exists even when parts of it do not compile.
pub fn assemble(graph: &ConceptGraph, config: &SynthesisConfig) -> Result<String, CoreError> {
    let pending = graph.pending();
    if !pending.is_empty() {
        return Err(CoreError::GraphIncomplete { pending });
    }

    let mut imports: Vec<String> = Vec::new();
    let mut push_import = |import: &str| {
        let import = import.trim();
        if !import.is_empty() && !imports.iter().any(|i| i == import) {
            imports.push(import.to_string());
        }
    };
    for import in &config.base_imports {
        push_import(import);
    }

    let mut grounded = Vec::new();
    let mut blocks = Vec::new();
    for id in resolved_order(graph)? {
        let node = graph.get(id)?;
        match node.status() {
            NodeStatus::Grounded => grounded.push(grounded_line(node)),
            NodeStatus::Synthesized => {
                let (own_imports, body) =
                    split_imports(node.synthesized_code().unwrap_or_default());
                for import in &own_imports {
                    push_import(import);
                }
                blocks.push(format!(
                    "{}\n-- Node: {}\n{}\n{}",
                    RULE,
                    one_line(node.description()),
                    RULE,
                    body
                ));
            }
            NodeStatus::Failed => blocks.push(failed_placeholder(node)),
            // Unreachable after Stage 2; emitted as a note rather than dropped.
            NodeStatus::ToSynthesize => blocks.push(format!(
                "{}\n-- NOT ATTEMPTED: {}\n{}",
                RULE,
                one_line(node.description()),
                RULE
            )),
            NodeStatus::Pending => {}
        }
    }

    let mut sections = Vec::new();
    if !imports.is_empty() {
        sections.push(imports.join("\n"));
    }
    if config.annotate_grounded && !grounded.is_empty() {
        sections.push(format!("-- Grounded concepts:\n{}", grounded.join("\n")));
    }
    sections.extend(blocks);

    let mut artifact = sections.join("\n\n");
    artifact.push('\n');
    Ok(artifact)
}

fn grounded_line(node: &ConceptNode) -> String {
    let target = node
        .resolved_reference()
        .map(|r| r.canonical_id.as_str())
        .unwrap_or("?");
    format!("--   {} => {}", one_line(node.description()), target)
}

fn failed_placeholder(node: &ConceptNode) -> String {
    let mut lines = vec![
        RULE.to_string(),
        format!(
            "-- FAILED: {} (after {} attempt(s))",
            one_line(node.description()),
            node.attempt_count()
        ),
        RULE.to_string(),
    ];
    for diagnostic in node.last_diagnostics() {
        for line in diagnostic.lines() {
            lines.push(format!("-- {}", line).trim_end().to_string());
        }
    }
    lines.join("\n")
}

/// Collapses whitespace so descriptions fit on a comment line.
fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use formalizer_core::ResolvedReference;

    fn sample() -> ConceptGraph {
        let mut graph = ConceptGraph::new("double of one\nis two");
        let root = graph.root();
        let double = graph.add_concept(root, "double").unwrap();
        let nat = graph.add_concept(root, "natural numbers").unwrap();
        let broken = graph.add_concept(root, "parity of double").unwrap();
        graph
            .mark_grounded(
                nat,
                ResolvedReference {
                    canonical_id: "Nat".into(),
                    informal_description: None,
                    distance: 0.02,
                },
            )
            .unwrap();
        for id in [double, broken, root] {
            graph.mark_to_synthesize(id, None).unwrap();
        }
        graph.begin_attempt(double, 16).unwrap();
        graph
            .mark_synthesized(
                double,
                "import Mathlib.Tactic\ndef double (n : ℕ) : ℕ := 2 * n".into(),
            )
            .unwrap();
        graph.begin_attempt(broken, 16).unwrap();
        graph
            .mark_failed(broken, vec!["line 1: unknown identifier 'Even'\nat Even".into()])
            .unwrap();
        graph.begin_attempt(root, 16).unwrap();
        graph
            .mark_synthesized(root, "import Mathlib\ntheorem double_one : double 1 = 2 := rfl".into())
            .unwrap();
        graph
    }

    #[test]
    fn assembles_header_blocks_and_placeholders() {
        let artifact = assemble(&sample(), &SynthesisConfig::default()).unwrap();
        insta::assert_snapshot!(artifact, @r"
        import Mathlib
        import Mathlib.Tactic

        -- Grounded concepts:
        --   natural numbers => Nat

        -- ------------------------------
        -- Node: double
        -- ------------------------------
        def double (n : ℕ) : ℕ := 2 * n

        -- ------------------------------
        -- FAILED: parity of double (after 1 attempt(s))
        -- ------------------------------
        -- line 1: unknown identifier 'Even'
        -- at Even

        -- ------------------------------
        -- Node: double of one is two
        -- ------------------------------
        theorem double_one : double 1 = 2 := rfl
        ");
    }

    #[test]
    fn assembly_is_idempotent() {
        let graph = sample();
        let config = SynthesisConfig::default();
        assert_eq!(
            assemble(&graph, &config).unwrap(),
            assemble(&graph, &config).unwrap()
        );
    }

    #[test]
    fn grounded_annotation_is_optional() {
        let config = SynthesisConfig {
            annotate_grounded: false,
            ..SynthesisConfig::default()
        };
        let artifact = assemble(&sample(), &config).unwrap();
        assert!(!artifact.contains("Grounded concepts"));
        assert!(artifact.starts_with("import Mathlib\nimport Mathlib.Tactic\n\n-- ----"));
    }

    #[test]
    fn pending_graph_is_refused() {
        let graph = ConceptGraph::new("unresolved");
        assert!(matches!(
            assemble(&graph, &SynthesisConfig::default()),
            Err(CoreError::GraphIncomplete { .. })
        ));
    }

    #[test]
    fn grounded_root_yields_header_only_artifact() {
        let mut graph = ConceptGraph::new("the set of even integers");
        graph
            .mark_grounded(
                graph.root(),
                ResolvedReference {
                    canonical_id: "Even".into(),
                    informal_description: None,
                    distance: 0.1,
                },
            )
            .unwrap();
        let artifact = assemble(&graph, &SynthesisConfig::default()).unwrap();
        assert_eq!(
            artifact,
            "import Mathlib\n\n-- Grounded concepts:\n--   the set of even integers => Even\n"
        );
    }
}
