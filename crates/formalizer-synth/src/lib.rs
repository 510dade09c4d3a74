//! Stage 2 and the end-to-end pipeline.
//!
//! - [`synthesis`]: the compile-checked reflection loop per concept.
//! - [`assembler`]: the single `.lean` artifact.
//! - [`alignment`]: optional back-translation consistency check.
//! - [`report`]: the serializable run summary.
//! - [`pipeline`]: [`Formalizer`], which runs all of the above.

pub mod alignment;
pub mod assembler;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod synthesis;

pub use alignment::{AlignmentVerdict, ConsistencyLevel, SemanticAligner};
pub use assembler::assemble;
pub use error::PipelineError;
pub use pipeline::{Formalizer, ModelOptions, RunOutput};
pub use report::{fingerprint, NodeSummary, RunReport, StatusCounts};
pub use synthesis::{ReflectionContext, SynthesisEngine, SynthesisOptions, SynthesisSummary};
