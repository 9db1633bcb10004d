//! Model name → runner factory registry
//!
//! The dispatcher only ever asks the registry for a [`ModelRunner`]. Adding a
//! model family means implementing [`ModelFamily`] and registering the model
//! names it serves.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::EvalSettings;
use crate::errors::EvalError;
use crate::llm::{create_llm_client, LLM};
use crate::logging::ExampleLog;
use crate::runner::{FunctionCallRunner, ModelRunner, RunnerOptions};
use crate::tools::ToolInvoker;

/// Models evaluated by the benchmark out of the box.
pub const DEFAULT_MODELS: &[&str] = &[
    "openai/gpt-4.1",
    "openai/gpt-4o-mini",
    "openai/o4-mini-high",
    "openai/o3-high",
    "gpt-4o-2024-08-06",
    "gpt-4-turbo-2024-04-09",
    "anthropic/claude-4-sonnet-thinking-off",
    "anthropic/claude-4-sonnet-thinking-on",
    "glm-4-9b-chat",
    "glm-4-long",
    "Llama-3.1-70B",
    "Llama-3.1-8B",
    "Meta-Llama-3.1-405B-Instruct-FP8",
    "qwen2.5-7b-instruct",
    "qwen2.5-72b-instruct",
    "togetherai/Qwen/Qwen3-235B-A22B-FP8",
    "togetherai/Qwen/Qwen3-235B-A22B-Instruct-2507-FP8",
    "togetherai/Qwen/Qwen3-235B-A22B-Thinking-2507-FP8",
    "deepseek-ai/DeepSeek-V3-0324",
    "deepseek-ai/DeepSeek-R1-0528",
    "mistral-large-2407",
    "google/gemini-2.5-flash-thinking-off",
    "google/gemini-2.5-flash-thinking-on",
    "google/gemini-2.5-pro-thinking-off",
    "google/gemini-2.5-pro-thinking-on",
    "xai/grok-4",
    "togetherai/moonshotai/Kimi-K2-Instruct",
];

/// Everything a family needs to build a runner for one example.
pub struct ModelContext<'a> {
    pub model_name: &'a str,
    pub settings: &'a EvalSettings,
    pub tools: Arc<dyn ToolInvoker>,
    pub log: Arc<ExampleLog>,
}

pub trait ModelFamily: Send + Sync {
    fn name(&self) -> &str;
    fn build_runner(&self, ctx: ModelContext<'_>) -> Result<Box<dyn ModelRunner>, EvalError>;
}

/// Models served through an OpenAI-compatible chat-completions endpoint.
pub struct OpenAICompatibleFamily;

impl ModelFamily for OpenAICompatibleFamily {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn build_runner(&self, ctx: ModelContext<'_>) -> Result<Box<dyn ModelRunner>, EvalError> {
        let llm: Arc<dyn LLM> = create_llm_client(
            &ctx.settings.endpoint,
            ctx.model_name,
            &ctx.settings.runner.parameters,
        );
        let runner = FunctionCallRunner::new(
            llm,
            ctx.tools,
            RunnerOptions::from_settings(ctx.settings),
        )
        .with_log(ctx.log);
        Ok(Box::new(runner))
    }
}

pub struct ModelRegistry {
    families: BTreeMap<String, Arc<dyn ModelFamily>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            families: BTreeMap::new(),
        }
    }

    pub fn with_default_models() -> Self {
        let mut registry = Self::new();
        let family: Arc<dyn ModelFamily> = Arc::new(OpenAICompatibleFamily);
        for model in DEFAULT_MODELS {
            registry.register(model, family.clone());
        }
        registry
    }

    pub fn register(&mut self, model_name: &str, family: Arc<dyn ModelFamily>) {
        self.families.insert(model_name.to_string(), family);
    }

    pub fn get(&self, model_name: &str) -> Result<Arc<dyn ModelFamily>, EvalError> {
        self.families.get(model_name).cloned().ok_or_else(|| {
            EvalError::ConfigError(format!(
                "Unknown model '{}'. Known models: {}",
                model_name,
                self.model_names().join(", ")
            ))
        })
    }

    pub fn model_names(&self) -> Vec<String> {
        self.families.keys().cloned().collect()
    }

    pub fn build_runner(&self, ctx: ModelContext<'_>) -> Result<Box<dyn ModelRunner>, EvalError> {
        self.get(ctx.model_name)?.build_runner(ctx)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_default_models()
    }
}
