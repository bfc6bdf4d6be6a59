//! Local completions backend
//!
//! Talks to a llama.cpp-style server exposing `/v1/completions`. Local models
//! are steered with an instruction/response frame and cut off at the first
//! newline, so every completion is at most one line.

use std::time::Duration;

use async_trait::async_trait;

use super::openai::classify_error;
use super::source::{InstructionError, LanguageModel, PromptKind};

/// Default local server address
pub const DEFAULT_LOCAL_URL: &str = "http://localhost:8000";

/// Client for a local completions server
#[derive(Clone)]
pub struct LocalClient {
    base_url: String,
    client: reqwest::Client,
}

impl LocalClient {
    /// Create a new local completions client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the server (e.g., "http://localhost:8000")
    /// * `timeout` - Upper bound for a single request
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, InstructionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

/// Wrap a prompt in the instruction/response frame
///
/// Command prompts end with a shell prompt sigil so the model continues with
/// a command rather than prose.
pub fn frame_prompt(prompt: &str, kind: PromptKind) -> String {
    match kind {
        PromptKind::Command => format!("\n\n### Instructions:\n{}\n### Response:\n$", prompt),
        PromptKind::Prose => format!("\n\n### Instructions:\n{}\n### Response:\n", prompt),
    }
}

/// Extract the trimmed text of the first choice from a completions response
pub fn parse_completion(body: &str) -> Result<String, InstructionError> {
    let data: serde_json::Value = serde_json::from_str(body)?;
    let text = data["choices"][0]["text"].as_str().ok_or_else(|| {
        InstructionError::MalformedResponse("response has no choices[0].text".to_string())
    })?;

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(InstructionError::MalformedResponse(
            "empty response from local model".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Classify a non-success response from the local server
///
/// llama.cpp servers report an oversized prompt only in the message text.
pub fn classify_local_error(status: u16, body: &str) -> InstructionError {
    match classify_error(status, body) {
        InstructionError::Api { message, .. } if message.contains("exceed context window") => {
            InstructionError::InputTooLarge(message)
        }
        err => err,
    }
}

#[async_trait]
impl LanguageModel for LocalClient {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(&self, prompt: &str, kind: PromptKind) -> Result<String, InstructionError> {
        let endpoint = format!("{}/v1/completions", self.base_url);

        let response = self
            .client
            .post(&endpoint)
            .header("Accept", "application/json")
            .json(&serde_json::json!({
                "prompt": frame_prompt(prompt, kind),
                "stop": ["\n", "###"]
            }))
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;

        if !(200..300).contains(&status) {
            return Err(classify_local_error(status, &text));
        }

        parse_completion(&text)
    }
}
