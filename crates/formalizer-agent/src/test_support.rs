//! In-memory collaborators for tests: a scripted model and a table search.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use formalizer_core::{normalize_description, CollaboratorError};

use crate::llm_provider::{ChatMessage, CompletionOptions, LanguageModel};
use crate::search::{ConceptSearch, SearchHit};

pub fn hit(name: &str, distance: f64) -> SearchHit {
    SearchHit {
        canonical_id: name.to_string(),
        informal_description: None,
        distance,
    }
}

struct Rule {
    needle: String,
    replies: VecDeque<Result<String, CollaboratorError>>,
}

/// Replies to prompts by substring match.
///
/// Each rule holds a queue of replies. The last reply in a queue repeats
/// forever. Rules are tried in registration order. A prompt that matches no
/// rule gets [`CollaboratorError::Unavailable`].
#[derive(Default)]
pub struct ScriptedModel {
    rules: Mutex<Vec<Rule>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<I, S>(self, needle: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replies = replies.into_iter().map(|r| Ok(r.into())).collect();
        self.push_rule(needle, replies)
    }

    pub fn on_error(self, needle: &str, error: CollaboratorError) -> Self {
        self.push_rule(needle, VecDeque::from([Err(error)]))
    }

    fn push_rule(self, needle: &str, replies: VecDeque<Result<String, CollaboratorError>>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                needle: needle.to_string(),
                replies,
            });
        }
        self
    }

    /// Every prompt received so far, messages joined with newlines.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts().iter().filter(|p| p.contains(needle)).count()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<String, CollaboratorError> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }

        let mut rules = self
            .rules
            .lock()
            .map_err(|_| CollaboratorError::unavailable("model", "script poisoned"))?;
        let rule = rules
            .iter_mut()
            .find(|r| prompt.contains(&r.needle))
            .ok_or_else(|| CollaboratorError::unavailable("model", "no scripted reply"))?;

        let reply = if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        };
        reply.unwrap_or_else(|| Err(CollaboratorError::unavailable("model", "empty script")))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Search results keyed by normalized query.
#[derive(Default)]
pub struct TableSearch {
    table: HashMap<String, Vec<SearchHit>>,
    failing: bool,
    queries: Mutex<Vec<String>>,
}

impl TableSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A search that is always unreachable.
    pub fn failing() -> Self {
        TableSearch {
            failing: true,
            ..Self::default()
        }
    }

    pub fn with(mut self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.table.insert(normalize_description(query), hits);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConceptSearch for TableSearch {
    async fn search(
        &self,
        queries: &[String],
        limit: usize,
    ) -> Result<Vec<SearchHit>, CollaboratorError> {
        if let Ok(mut seen) = self.queries.lock() {
            seen.extend(queries.iter().cloned());
        }
        if self.failing {
            return Err(CollaboratorError::unavailable("search", "connection refused"));
        }
        Ok(queries
            .iter()
            .flat_map(|q| {
                self.table
                    .get(&normalize_description(q))
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .take(limit)
            })
            .collect())
    }
}
