//! Instruction source boundary
//!
//! `InstructionSource` is what the agent core consumes: next commands and
//! outcome summaries. `InstructionClient` implements it on top of any
//! `LanguageModel` (prompt in, completion text out) using the prompt set in
//! `prompts`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::prompts;
use crate::agent::CommandHistoryEntry;

/// Error type for instruction-source operations
#[derive(Debug)]
pub enum InstructionError {
    /// The request never produced an HTTP response (connect, timeout, body read)
    Transport(String),
    /// The source answered with a non-success status
    Api { status: u16, message: String },
    /// The source rejected the prompt because it exceeds its input budget
    InputTooLarge(String),
    /// The response did not have the expected shape
    MalformedResponse(String),
    /// No credential was configured for a remote source
    MissingApiKey,
}

impl InstructionError {
    /// Whether this is the recoverable size rejection
    pub fn is_input_too_large(&self) -> bool {
        matches!(self, InstructionError::InputTooLarge(_))
    }
}

impl std::fmt::Display for InstructionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstructionError::Transport(msg) => write!(f, "Instruction source transport error: {}", msg),
            InstructionError::Api { status, message } => {
                write!(f, "Instruction source API error ({}): {}", status, message)
            }
            InstructionError::InputTooLarge(msg) => write!(f, "Input too large for instruction source: {}", msg),
            InstructionError::MalformedResponse(msg) => {
                write!(f, "Malformed instruction source response: {}", msg)
            }
            InstructionError::MissingApiKey => write!(f, "undefined env var OPENAI_API_KEY"),
        }
    }
}

impl std::error::Error for InstructionError {}

impl From<reqwest::Error> for InstructionError {
    fn from(e: reqwest::Error) -> Self {
        InstructionError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for InstructionError {
    fn from(e: serde_json::Error) -> Self {
        InstructionError::MalformedResponse(e.to_string())
    }
}

/// The external decision-maker driving a session
#[async_trait]
pub trait InstructionSource: Send + Sync {
    /// First command, given only the goal. Returns exactly one trimmed line.
    async fn generate_initial(&self, goal: &str) -> Result<String, InstructionError>;

    /// Next command given the goal and ordered history. Returns exactly one trimmed line.
    async fn generate_next(
        &self,
        goal: &str,
        history: &[CommandHistoryEntry],
    ) -> Result<String, InstructionError>;

    /// Outcome of a command given its output.
    ///
    /// Must return `InstructionError::InputTooLarge` when the output exceeds
    /// the source's input budget.
    async fn summarize_outcome(&self, command: &str, output: &str) -> Result<String, InstructionError>;

    /// Outcome of a command given only the last lines of its output
    async fn summarize_truncated(&self, command: &str, tail: &str) -> Result<String, InstructionError>;

    /// Summary of one contiguous fragment of a long output
    async fn summarize_fragment(&self, fragment: &str) -> Result<String, InstructionError>;

    /// Overall outcome from ordered fragment summaries
    async fn summarize_partials(&self, command: &str, partials: &[String]) -> Result<String, InstructionError>;
}

/// What a prompt expects back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// A single shell command line
    Command,
    /// Free-form prose (outcomes, summaries)
    Prose,
}

/// A text-completion backend
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Complete a prompt, returning the trimmed response text
    async fn complete(&self, prompt: &str, kind: PromptKind) -> Result<String, InstructionError>;
}

/// Prompt-driven `InstructionSource` over a `LanguageModel`
#[derive(Clone)]
pub struct InstructionClient {
    model: Arc<dyn LanguageModel>,
    tail_lines: usize,
}

impl InstructionClient {
    /// Create a new instruction client
    ///
    /// # Arguments
    /// * `model` - Completion backend
    /// * `tail_lines` - Line count quoted in the truncated-outcome prompt
    pub fn new(model: Arc<dyn LanguageModel>, tail_lines: usize) -> Self {
        Self { model, tail_lines }
    }

    async fn ask(&self, prompt: String, kind: PromptKind) -> Result<String, InstructionError> {
        debug!(model = self.model.name(), ?kind, prompt = %prompt, "Sending request to instruction source");
        let response = self.model.complete(&prompt, kind).await;
        match &response {
            Ok(text) => debug!(model = self.model.name(), response = %text, "Received response"),
            Err(e) => debug!(model = self.model.name(), error = %e, "Instruction source request failed"),
        }
        response
    }

    async fn ask_command(&self, prompt: String) -> Result<String, InstructionError> {
        let response = self.ask(prompt, PromptKind::Command).await?;
        let command = first_line(&response);
        if command.is_empty() {
            return Err(InstructionError::MalformedResponse(
                "response did not contain a command".to_string(),
            ));
        }
        Ok(command)
    }
}

#[async_trait]
impl InstructionSource for InstructionClient {
    async fn generate_initial(&self, goal: &str) -> Result<String, InstructionError> {
        self.ask_command(prompts::initial_command(goal)).await
    }

    async fn generate_next(
        &self,
        goal: &str,
        history: &[CommandHistoryEntry],
    ) -> Result<String, InstructionError> {
        self.ask_command(prompts::next_command(goal, history)).await
    }

    async fn summarize_outcome(&self, command: &str, output: &str) -> Result<String, InstructionError> {
        self.ask(prompts::outcome(command, output), PromptKind::Prose).await
    }

    async fn summarize_truncated(&self, command: &str, tail: &str) -> Result<String, InstructionError> {
        self.ask(
            prompts::outcome_truncated(command, tail, self.tail_lines),
            PromptKind::Prose,
        )
        .await
    }

    async fn summarize_fragment(&self, fragment: &str) -> Result<String, InstructionError> {
        self.ask(prompts::fragment_summary(fragment), PromptKind::Prose).await
    }

    async fn summarize_partials(&self, command: &str, partials: &[String]) -> Result<String, InstructionError> {
        self.ask(prompts::rollup(command, partials), PromptKind::Prose).await
    }
}

/// First non-empty line of a response, trimmed
pub fn first_line(response: &str) -> String {
    response
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .to_string()
}
