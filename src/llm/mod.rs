//! Instruction source integration module
//!
//! This module provides the typed boundary to the language model that decides
//! which command to run next and summarizes what commands did:
//! - `source` - the `InstructionSource` trait and its prompt-driven client
//! - `openai` - hosted chat-completions backend
//! - `local` - local completions server backend

pub mod local;
pub mod openai;
pub mod prompts;
pub mod source;

use std::sync::Arc;

pub use local::LocalClient;
pub use openai::OpenAiClient;
pub use source::{
    InstructionClient, InstructionError, InstructionSource, LanguageModel, PromptKind,
};

use crate::config::{AgentConfig, SourceSelection};

/// Build the instruction source selected by the configuration
pub fn build_source(config: &AgentConfig) -> Result<Arc<dyn InstructionSource>, InstructionError> {
    let model: Arc<dyn LanguageModel> = match &config.source {
        SourceSelection::Remote { model } => {
            Arc::new(OpenAiClient::from_env(model.clone(), config.request_timeout)?)
        }
        SourceSelection::Local { url } => Arc::new(LocalClient::new(url.clone(), config.request_timeout)?),
    };
    Ok(Arc::new(InstructionClient::new(model, config.tail_lines)))
}
