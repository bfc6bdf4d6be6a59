//! Remote chat-completions backend
//!
//! Talks to an OpenAI-compatible `/v1/chat/completions` endpoint. Each prompt
//! is sent as a single user message with deterministic sampling.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::source::{InstructionError, LanguageModel, PromptKind};

/// Default API base URL
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Completion budget for every request
const MAX_TOKENS: u32 = 200;

/// Error code the API uses when a prompt exceeds the model's context window
const CONTEXT_LENGTH_EXCEEDED: &str = "context_length_exceeded";

/// A message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request body for /v1/chat/completions
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Response from /v1/chat/completions
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

/// Error envelope returned on non-success statuses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Client for a hosted chat-completions model
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a new chat-completions client
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.openai.com")
    /// * `model` - Model name (e.g., "gpt-3.5-turbo")
    /// * `api_key` - Bearer credential
    /// * `timeout` - Upper bound for a single request
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, InstructionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create a client reading the credential from `OPENAI_API_KEY`
    pub fn from_env(model: impl Into<String>, timeout: Duration) -> Result<Self, InstructionError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(InstructionError::MissingApiKey)?;
        Self::new(DEFAULT_OPENAI_BASE_URL, model, api_key, timeout)
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, _kind: PromptKind) -> Result<String, InstructionError> {
        let endpoint = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;

        if !(200..300).contains(&status) {
            return Err(classify_error(status, &text));
        }

        parse_chat_response(&text)
    }
}

/// Turn a non-success response into the matching `InstructionError`
pub fn classify_error(status: u16, body: &str) -> InstructionError {
    let detail = serde_json::from_str::<ApiErrorEnvelope>(body).ok().map(|e| e.error);

    let message = detail
        .as_ref()
        .map(|d| d.message.clone())
        .unwrap_or_else(|| body.trim().to_string());

    let too_large = status == 413
        || detail
            .as_ref()
            .and_then(|d| d.code.as_deref())
            .map(|code| code == CONTEXT_LENGTH_EXCEEDED)
            .unwrap_or(false);

    if too_large {
        InstructionError::InputTooLarge(message)
    } else {
        InstructionError::Api { status, message }
    }
}

/// Extract the trimmed text of the first choice
pub fn parse_chat_response(body: &str) -> Result<String, InstructionError> {
    let parsed: ChatResponse = serde_json::from_str(body)?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| InstructionError::MalformedResponse("response has no choices".to_string()))?;
    Ok(choice.message.content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = ChatRequest {
            model: "gpt-3.5-turbo".to_string(),
            messages: vec![ChatMessage::user("hello")],
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["max_tokens"], 200);
    }

    #[test]
    fn test_parse_chat_response_trims() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"  ls -la \n"}}]}"#;
        assert_eq!(parse_chat_response(body).unwrap(), "ls -la");
    }

    #[test]
    fn test_parse_chat_response_without_choices() {
        let err = parse_chat_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, InstructionError::MalformedResponse(_)));
    }

    #[test]
    fn test_context_length_is_input_too_large() {
        let body = r#"{"error":{"message":"This model's maximum context length is 4097 tokens. Please reduce the length of the messages.","type":"invalid_request_error","code":"context_length_exceeded"}}"#;
        let err = classify_error(400, body);
        assert!(err.is_input_too_large());
    }

    #[test]
    fn test_other_errors_stay_api_errors() {
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests","code":"rate_limit_exceeded"}}"#;
        match classify_error(429, body) {
            InstructionError::Api { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_payload_too_large_status() {
        assert!(classify_error(413, "Request Entity Too Large").is_input_too_large());
    }
}
