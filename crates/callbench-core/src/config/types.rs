//! Configuration type definitions
//!
//! Two layers live here. [`SettingsFile`] is what a YAML settings file can
//! contain; every field is optional and has a benchmark default, so an empty
//! file (or no file at all) is a valid configuration. [`EvalSettings`] is the
//! resolved value built once at startup, with credentials looked up from the
//! environment, and passed explicitly into every client and invoker.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default = "default_env_files")]
    pub env_files: Vec<PathBuf>,
    #[serde(default)]
    pub environment: EnvironmentNames,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub judge: JudgeSettings,
    #[serde(default)]
    pub tool_api: ToolApiSettings,
}

impl Default for SettingsFile {
    fn default() -> Self {
        Self {
            env_files: default_env_files(),
            environment: EnvironmentNames::default(),
            retry: RetrySettings::default(),
            runner: RunnerSettings::default(),
            judge: JudgeSettings::default(),
            tool_api: ToolApiSettings::default(),
        }
    }
}

/// Names of the environment variables consulted for each credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentNames {
    #[serde(default = "default_base_url_env")]
    pub base_url_env: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_tool_api_key_env")]
    pub tool_api_key_env: String,
    #[serde(default = "default_judge_model_env")]
    pub judge_model_env: String,
}

impl Default for EnvironmentNames {
    fn default() -> Self {
        Self {
            base_url_env: default_base_url_env(),
            api_key_env: default_api_key_env(),
            tool_api_key_env: default_tool_api_key_env(),
            judge_model_env: default_judge_model_env(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_model_retry")]
    pub model: RetryPolicy,
    #[serde(default = "default_tool_retry")]
    pub tool: RetryPolicy,
    #[serde(default = "default_judge_retry")]
    pub judge: RetryPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            model: default_model_retry(),
            tool: default_tool_retry(),
            judge: default_judge_retry(),
        }
    }
}

/// Where tool-turn content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObservationSource {
    /// Execute every emitted call against the tool APIs.
    #[default]
    Live,
    /// Replay the gold observations for matched calls.
    Gold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunnerSettings {
    #[serde(default)]
    pub observation_source: ObservationSource,
    #[serde(default)]
    pub response_equivalence: bool,
    #[serde(default)]
    pub parameters: ModelParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Overrides the environment-provided judge model.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolApiSettings {
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

impl Default for ToolApiSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout(),
        }
    }
}

/// Model endpoint location and credential.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolApiConfig {
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl ToolApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ToolApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            timeout_secs: default_tool_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeConfig {
    pub enabled: bool,
    pub model: String,
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct EvalSettings {
    pub endpoint: EndpointConfig,
    pub tool_api: ToolApiConfig,
    pub judge: JudgeConfig,
    pub retry: RetrySettings,
    pub runner: RunnerSettings,
}

fn default_env_files() -> Vec<PathBuf> {
    vec![PathBuf::from(".env")]
}
fn default_base_url_env() -> String { "BASE_URL".to_string() }
fn default_api_key_env() -> String { "API_KEY".to_string() }
fn default_tool_api_key_env() -> String { "RAPID_API_KEY".to_string() }
fn default_judge_model_env() -> String { "JUDGE_MODEL".to_string() }
pub fn default_judge_model() -> String { "gpt-4o-2024-08-06".to_string() }
fn default_max_tokens() -> u32 { 2048 }
fn default_tool_timeout() -> u64 { 60 }
fn default_true() -> bool { true }

fn default_model_retry() -> RetryPolicy {
    RetryPolicy::new(5).with_delay(Duration::from_secs(10))
}

fn default_tool_retry() -> RetryPolicy {
    RetryPolicy::new(3).with_delay(Duration::from_secs(1))
}

fn default_judge_retry() -> RetryPolicy {
    RetryPolicy::new(3).with_delay(Duration::from_secs(2))
}
