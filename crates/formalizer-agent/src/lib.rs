//! Model and search collaborators, prompts, response parsing, and the
//! Stage 1 graph builder.

pub mod builder;
pub mod call;
pub mod expander;
pub mod grounding;
pub mod llm_provider;
pub mod prompts;
pub mod response;
pub mod search;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use builder::GraphBuilder;
pub use expander::{DecompositionExpander, ExpansionOutcome};
pub use grounding::{GroundingDecision, GroundingResolver};
pub use llm_provider::{ChatMessage, CompletionOptions, LanguageModel, LlmConfig, OpenAiCompatibleModel};
pub use search::{ConceptSearch, LeanSearchClient, SearchConfig, SearchHit};
