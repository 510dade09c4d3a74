pub mod config;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod schedule;

// Re-export commonly used types
pub use config::{AlignmentConfig, PlannerConfig, RunConfig, SynthesisConfig};
pub use error::{CollaboratorError, ConfigError, CoreError};
pub use graph::{ConceptGraph, DependencyEdge};
pub use id::ConceptId;
pub use node::{normalize_description, ConceptNode, NodeStatus, ResolvedReference};
pub use schedule::{build_order, resolved_order, topological_order};
