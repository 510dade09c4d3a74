//! Language-model collaborator and its OpenAI-compatible chat client.

use async_trait::async_trait;
use formalizer_core::CollaboratorError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

const COLLABORATOR: &str = "model";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    /// Ask the provider for a JSON object payload.
    pub json_mode: bool,
}

impl CompletionOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        CompletionOptions {
            temperature: Some(temperature),
            json_mode: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Text-completion service.
///
/// Implementations return the assistant's text, trimmed. Transport and
/// protocol failures are reported as [`CollaboratorError`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, CollaboratorError>;

    /// Model identifier, for logs and reports.
    fn model_name(&self) -> &str;
}

/// Connection settings for an OpenAI-compatible `/chat/completions` API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    /// Prepended as a system message to every call.
    pub system_prompt: Option<String>,
    /// Used for grounding, decomposition, reflection, and alignment.
    pub strict_temperature: f32,
    /// Used for first-attempt synthesis.
    pub creative_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            system_prompt: Some("You are an AI assistant expert in Lean 4 and Mathlib.".to_string()),
            strict_temperature: 0.1,
            creative_temperature: 0.1,
        }
    }
}

impl LlmConfig {
    pub fn strict(&self) -> CompletionOptions {
        CompletionOptions::with_temperature(self.strict_temperature)
    }

    pub fn creative(&self) -> CompletionOptions {
        CompletionOptions::with_temperature(self.creative_temperature)
    }
}

pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiCompatibleModel {
    pub fn new(config: LlmConfig) -> Self {
        OpenAiCompatibleModel {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn request_body(&self, messages: &[ChatMessage], options: &CompletionOptions) -> serde_json::Value {
        let mut payload = Vec::with_capacity(messages.len() + 1);
        let has_system = messages.iter().any(|m| m.role == ChatRole::System);
        if let (false, Some(system_prompt)) = (has_system, self.config.system_prompt.as_ref()) {
            payload.push(json!({ "role": "system", "content": system_prompt }));
        }
        for message in messages {
            payload.push(json!({ "role": message.role, "content": message.content }));
        }

        let mut body = json!({
            "model": self.config.model,
            "messages": payload,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if options.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, CollaboratorError> {
        let endpoint = format!(
            "{}/chat/completions",
            self.config.api_base_url.trim_end_matches('/')
        );
        let api_key = self.config.api_key.clone().unwrap_or_default();
        let body = self.request_body(messages, options);
        debug!(model = %self.config.model, "model request: {}", body);

        let response = self
            .client
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                CollaboratorError::unavailable(COLLABORATOR, format!("request failed: {}", err))
            })?;

        let status = response.status();
        let body_text = response.text().await.map_err(|err| {
            CollaboratorError::unavailable(COLLABORATOR, format!("response read failed: {}", err))
        })?;

        if !status.is_success() {
            return Err(CollaboratorError::unavailable(
                COLLABORATOR,
                format!("request failed ({}): {}", status, body_text),
            ));
        }

        let content = parse_chat_response(&body_text)?;
        debug!("model response: {}", content);
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

fn parse_chat_response(body_text: &str) -> Result<String, CollaboratorError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body_text).map_err(|err| {
        CollaboratorError::malformed(COLLABORATOR, format!("response parse failed: {}", err))
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| CollaboratorError::malformed(COLLABORATOR, "response missing assistant content"))
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_prepends_system_prompt_and_json_mode() {
        let model = OpenAiCompatibleModel::new(LlmConfig::default());
        let body = model.request_body(
            &[ChatMessage::user("decompose this")],
            &CompletionOptions::with_temperature(0.2).json(),
        );

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "decompose this");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn explicit_system_message_is_not_duplicated() {
        let model = OpenAiCompatibleModel::new(LlmConfig::default());
        let body = model.request_body(
            &[ChatMessage::system("custom"), ChatMessage::user("hi")],
            &CompletionOptions::default(),
        );
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "custom");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn parses_first_choice_content() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"  theorem x : True := trivial \n"}}]}"#;
        assert_eq!(parse_chat_response(raw).unwrap(), "theorem x : True := trivial");
    }

    #[test]
    fn missing_content_is_malformed() {
        let err = parse_chat_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed { .. }));

        let err = parse_chat_response("not json").unwrap_err();
        assert_eq!(err.collaborator(), "model");
    }

    #[test]
    fn api_key_is_never_serialized() {
        let config = LlmConfig {
            api_key: Some("sk-secret".into()),
            ..LlmConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
