//! Language model client abstraction.
//!
//! A model client turns a conversation prefix plus the offered tool
//! definitions into the next assistant turn. Every model family is reached
//! through the [`LLM`] trait, so the conversation runner never sees wire
//! formats.

pub use crate::core_types::{LLMResponse, Message, ToolMetadata};
use crate::errors::EvalError;
use async_trait::async_trait;

pub mod providers;

pub use providers::openai::OpenAIClient;
pub use providers::{actual_model_name, create_llm_client};

#[async_trait]
pub trait LLM: Send + Sync {
    async fn generate(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolMetadata>>,
    ) -> Result<LLMResponse, EvalError>;
}
