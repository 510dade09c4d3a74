//! Machine-readable summary of one run.

use formalizer_core::{ConceptGraph, ConceptId, NodeStatus};
use serde::{Deserialize, Serialize};

use crate::alignment::AlignmentVerdict;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub grounded: usize,
    pub to_synthesize: usize,
    pub synthesized: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn of(graph: &ConceptGraph) -> Self {
        StatusCounts {
            total: graph.len(),
            pending: graph.count_by_status(NodeStatus::Pending),
            grounded: graph.count_by_status(NodeStatus::Grounded),
            to_synthesize: graph.count_by_status(NodeStatus::ToSynthesize),
            synthesized: graph.count_by_status(NodeStatus::Synthesized),
            failed: graph.count_by_status(NodeStatus::Failed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: ConceptId,
    pub description: String,
    pub status: NodeStatus,
    pub depth: u32,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub statement: String,
    pub counts: StatusCounts,
    /// In creation order.
    pub nodes: Vec<NodeSummary>,
    /// blake3 hex digest of the artifact text.
    pub artifact_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<AlignmentVerdict>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn new(
        statement: &str,
        graph: &ConceptGraph,
        artifact: &str,
        alignment: Option<AlignmentVerdict>,
        elapsed_ms: u64,
    ) -> Self {
        let nodes = graph
            .nodes()
            .map(|node| NodeSummary {
                id: node.id(),
                description: node.description().to_string(),
                status: node.status(),
                depth: node.depth(),
                attempts: node.attempt_count(),
                reference: node.resolved_reference().map(|r| r.canonical_id.clone()),
                diagnostics: node.last_diagnostics().to_vec(),
            })
            .collect();

        RunReport {
            statement: statement.to_string(),
            counts: StatusCounts::of(graph),
            nodes,
            artifact_fingerprint: fingerprint(artifact),
            alignment,
            elapsed_ms,
        }
    }

    /// True when no concept failed or was left unattempted.
    pub fn all_synthesized(&self) -> bool {
        self.counts.failed == 0 && self.counts.to_synthesize == 0 && self.counts.pending == 0
    }

    /// `None` when alignment did not run.
    pub fn aligned(&self) -> Option<bool> {
        self.alignment.as_ref().map(AlignmentVerdict::is_consistent)
    }
}

/// blake3 hex digest of `artifact`.
pub fn fingerprint(artifact: &str) -> String {
    blake3::hash(artifact.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use formalizer_core::ResolvedReference;

    #[test]
    fn fingerprint_tracks_content() {
        assert_eq!(fingerprint("import Mathlib\n"), fingerprint("import Mathlib\n"));
        assert_ne!(fingerprint("import Mathlib\n"), fingerprint("import Mathlib\n\n"));
        assert_eq!(fingerprint("").len(), 64);
    }

    #[test]
    fn report_summarizes_graph() {
        let mut graph = ConceptGraph::new("a group with finite order");
        let root = graph.root();
        let carrier = graph.add_concept(root, "finite carrier set").unwrap();
        graph
            .mark_grounded(
                carrier,
                ResolvedReference {
                    canonical_id: "Fintype".into(),
                    informal_description: None,
                    distance: 0.05,
                },
            )
            .unwrap();
        graph.mark_to_synthesize(root, None).unwrap();
        graph.begin_attempt(root, 16).unwrap();
        graph.mark_failed(root, vec!["type mismatch".into()]).unwrap();

        let report = RunReport::new("a group with finite order", &graph, "x\n", None, 12);

        assert_eq!(report.counts.total, 2);
        assert_eq!(report.counts.grounded, 1);
        assert_eq!(report.counts.failed, 1);
        assert!(!report.all_synthesized());
        assert_eq!(report.aligned(), None);
        assert_eq!(report.nodes[1].reference.as_deref(), Some("Fintype"));
        assert_eq!(report.nodes[0].diagnostics, ["type mismatch"]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["nodes"][0]["status"], "failed");
        assert!(json.get("alignment").is_none());
    }
}
