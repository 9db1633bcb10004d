//! Error types for failure handling across the evaluation engine
//!
//! Errors are grouped by their source (model endpoint, configuration, data
//! files, checkpoint, workers) so that callers can tell apart the failures
//! that stop a whole run at startup from the ones that only drop a single
//! example. Tool API failures have their own type in [`crate::tools`] because
//! most of them are recorded as conversation data rather than propagated.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EvalError {
    #[error("Model interaction failed: {0}")]
    ModelError(String),
    #[error("Tool execution failed for '{tool_name}': {message}")]
    ToolError { tool_name: String, message: String },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
    #[error("Dataset error: {0}")]
    DatasetError(String),
    #[error("Checkpoint error: {0}")]
    CheckpointError(String),
    #[error("Worker error: {0}")]
    WorkerError(String),
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for EvalError {
    fn from(err: std::io::Error) -> Self {
        EvalError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for EvalError {
    fn from(err: reqwest::Error) -> Self {
        EvalError::ModelError(err.to_string())
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::ParsingError(err.to_string())
    }
}
