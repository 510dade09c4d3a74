//! Search collaborator and the LeanSearch HTTP client.
//!
//! The service answers with a list of hits per query. Each hit wraps a
//! `result` record holding the declaration name (a list of name components
//! or a dotted string), an informal description, and a docstring, next to a
//! relevance `distance` (lower is closer).

use std::time::Duration;

use async_trait::async_trait;
use formalizer_core::CollaboratorError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

const COLLABORATOR: &str = "search";
const DOCSTRING_PREVIEW_CHARS: usize = 150;

/// One ranked library candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub canonical_id: String,
    pub informal_description: Option<String>,
    pub distance: f64,
}

#[async_trait]
pub trait ConceptSearch: Send + Sync {
    /// Returns up to `limit` hits per query, flattened in response order.
    async fn search(&self, queries: &[String], limit: usize)
        -> Result<Vec<SearchHit>, CollaboratorError>;
}

/// LeanSearch connection settings.
///
/// The client retries on its own, so one `search` call can take up to
/// [`SearchConfig::retry_window`]. Callers wrap the call in the run's
/// `call_timeout_secs`, which must cover that window or the outer timeout
/// cuts the retries short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_url: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Additional tries after a failed request.
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            api_url: "https://leansearch.net/search".to_string(),
            timeout_secs: 25,
            max_retries: 3,
            retry_delay_secs: 2,
        }
    }
}

impl SearchConfig {
    /// Longest time one `search` call can take: every try timing out, plus
    /// the delays between tries.
    pub fn retry_window(&self) -> Duration {
        let tries = u64::from(self.max_retries) + 1;
        Duration::from_secs(
            tries * self.timeout_secs + u64::from(self.max_retries) * self.retry_delay_secs,
        )
    }
}

pub struct LeanSearchClient {
    client: reqwest::Client,
    config: SearchConfig,
}

impl LeanSearchClient {
    pub fn new(config: SearchConfig) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| CollaboratorError::unavailable(COLLABORATOR, err.to_string()))?;
        Ok(LeanSearchClient { client, config })
    }

    async fn request_once(&self, body: &Value) -> Result<Vec<SearchHit>, CollaboratorError> {
        let response = self
            .client
            .post(&self.config.api_url)
            .json(body)
            .send()
            .await
            .map_err(|err| {
                CollaboratorError::unavailable(COLLABORATOR, format!("request failed: {}", err))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::unavailable(
                COLLABORATOR,
                format!("request failed ({})", status),
            ));
        }

        let payload: Value = response.json().await.map_err(|err| {
            CollaboratorError::malformed(COLLABORATOR, format!("response parse failed: {}", err))
        })?;
        parse_hits(&payload)
    }
}

#[async_trait]
impl ConceptSearch for LeanSearchClient {
    async fn search(
        &self,
        queries: &[String],
        limit: usize,
    ) -> Result<Vec<SearchHit>, CollaboratorError> {
        let body = json!({ "query": queries, "num_results": limit });
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.request_once(&body).await {
                Ok(hits) => {
                    debug!(queries = ?queries, hits = hits.len(), "search returned");
                    return Ok(hits);
                }
                // A malformed payload will not improve on retry.
                Err(err @ CollaboratorError::Malformed { .. }) => return Err(err),
                Err(err) => {
                    warn!(attempt = attempt + 1, error = %err, "search request failed");
                    last_error = Some(err);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| CollaboratorError::unavailable(COLLABORATOR, "no attempt was made")))
    }
}

/// Validates a LeanSearch payload and extracts its hits.
///
/// Accepts a flat list of hits or a list of per-query lists. Individual
/// hits without a name or distance are skipped.
pub fn parse_hits(payload: &Value) -> Result<Vec<SearchHit>, CollaboratorError> {
    let outer = payload
        .as_array()
        .ok_or_else(|| CollaboratorError::malformed(COLLABORATOR, "expected a JSON array"))?;

    let mut hits = Vec::new();
    for entry in outer {
        match entry {
            Value::Array(inner) => hits.extend(inner.iter().filter_map(parse_hit)),
            other => hits.extend(parse_hit(other)),
        }
    }
    Ok(hits)
}

fn parse_hit(hit: &Value) -> Option<SearchHit> {
    let record = hit.get("result").unwrap_or(hit);

    let canonical_id = match record.get("name")? {
        Value::Array(parts) => parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("."),
        Value::String(name) => name.clone(),
        _ => return None,
    };
    if canonical_id.is_empty() {
        return None;
    }

    let distance = hit
        .get("distance")
        .or_else(|| record.get("distance"))
        .and_then(Value::as_f64)?;

    let informal_description = record
        .get("informal_description")
        .and_then(Value::as_str)
        .filter(|d| !d.trim().is_empty() && !d.contains("[TRANSLATION_FAILED]"))
        .map(|d| d.trim().to_string())
        .or_else(|| {
            record
                .get("docstring")
                .and_then(Value::as_str)
                .filter(|d| !d.trim().is_empty())
                .map(|d| {
                    let preview: String = d.chars().take(DOCSTRING_PREVIEW_CHARS).collect();
                    format!("(Docstring): {}", preview)
                })
        });

    Some(SearchHit {
        canonical_id,
        informal_description,
        distance,
    })
}
