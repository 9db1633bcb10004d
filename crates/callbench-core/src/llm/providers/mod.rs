//! Wire implementations of the [`LLM`] trait.

use std::sync::Arc;

use crate::config::{EndpointConfig, ModelParameters};
use crate::llm::LLM;

pub mod openai;

/// Benchmark model names that an endpoint serves under a different id.
const MODEL_ALIASES: &[(&str, &str)] = &[("gpt-4o-2024-08-06", "openai/gpt-4o-20240806")];

/// The id sent on the wire for a benchmark model name.
pub fn actual_model_name(model_name: &str) -> &str {
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == model_name)
        .map(|(_, actual)| *actual)
        .unwrap_or(model_name)
}

/// OpenAI-compatible chat-completions client for `model_name` at `endpoint`.
pub fn create_llm_client(
    endpoint: &EndpointConfig,
    model_name: &str,
    parameters: &ModelParameters,
) -> Arc<dyn LLM> {
    let client = openai::OpenAIClient::new(
        endpoint.api_key.clone(),
        actual_model_name(model_name).to_string(),
    )
    .with_api_base(endpoint.base_url.clone())
    .with_temperature(parameters.temperature)
    .with_max_tokens(parameters.max_tokens);

    Arc::new(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_aliasing() {
        assert_eq!(actual_model_name("gpt-4o-2024-08-06"), "openai/gpt-4o-20240806");
        assert_eq!(actual_model_name("qwen2.5-72b-instruct"), "qwen2.5-72b-instruct");
    }
}
