//! Engine for evaluating multi-turn function calling against scripted
//! reference conversations.
//!
//! Each benchmark example is a gold conversation in which an assistant
//! answers a user request by calling external data APIs over several turns.
//! The engine replays the example against a model, executes the calls the
//! model emits, scores them against the gold calls and writes one result
//! record per example. Runs are parallel and resumable.
//!
//! # Architecture Overview
//!
//! - **Retry policy**: bounded re-attempts for every remote call ([`retry`])
//! - **Tool invocation**: a definition table of REST operations behind a name-keyed registry ([`tools`])
//! - **Model clients**: an [`LLM`] trait with an OpenAI-compatible implementation ([`llm`])
//! - **Conversation runner**: the per-example state machine and its scoring ([`runner`])
//! - **Response evaluation**: an LLM judge for the closing free-text answer ([`evaluator`])
//! - **Model registry**: model name to runner factory ([`registry`])
//! - **Checkpoint store**: the append-only JSON Lines result log ([`checkpoint`])
//! - **Dispatch**: bounded, resumable fan-out of examples to isolated workers ([`dispatcher`], [`worker`])

pub mod checkpoint;
pub mod config;
pub mod core_types;
pub mod dataset;
pub mod dispatcher;
pub mod errors;
pub mod evaluator;
pub mod llm;
pub mod logging;
pub mod record;
pub mod registry;
pub mod report;
pub mod retry;
pub mod runner;
pub mod tools;
pub mod worker;

pub use checkpoint::CheckpointStore;
pub use config::*;
pub use core_types::{Example, FunctionCall, Role, Turn};
pub use dispatcher::{DispatchProgress, DispatchSummary, Dispatcher};
pub use errors::EvalError;
pub use evaluator::{LlmJudge, ResponseEvaluator};
pub use llm::LLM;
pub use record::{CountDict, ErrorType, ResultRecord, TerminalMessage};
pub use registry::ModelRegistry;
pub use retry::RetryPolicy;
pub use runner::{FunctionCallRunner, ModelRunner, RunOutcome, RunnerOptions, TerminalState};
pub use tools::{ToolError, ToolInvoker, ToolRegistry};
pub use worker::{EvaluationContext, ExampleWorker, InProcessWorker, SubprocessWorker, WorkerOutcome};

#[cfg(test)]
pub mod test_utils;
