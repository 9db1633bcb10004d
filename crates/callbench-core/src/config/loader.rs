//! Settings loader for YAML files and environment resolution
//!
//! Credentials are never read from the settings file itself, only the names
//! of the variables that hold them. Resolution goes through a lookup closure
//! so that tests can supply an environment without touching the process one.

use std::env;
use std::path::Path;

use crate::config::types::*;
use crate::errors::EvalError;

pub struct SettingsLoader;

impl SettingsLoader {
    /// Reads settings from `path` when given, then loads the listed env
    /// files and resolves credentials from the process environment.
    pub fn load(path: Option<&Path>) -> Result<EvalSettings, EvalError> {
        let file = Self::read(path)?;
        Self::load_env_files(&file)?;
        Self::resolve_with(&file, |key| env::var(key).ok())
    }

    /// Tool API credentials only. Commands that never talk to a model
    /// endpoint use this so that `BASE_URL` and `API_KEY` stay optional.
    pub fn load_tool_api(path: Option<&Path>) -> Result<ToolApiConfig, EvalError> {
        let file = Self::read(path)?;
        Self::load_env_files(&file)?;
        Ok(Self::resolve_tool_api(&file, |key| env::var(key).ok()))
    }

    fn read(path: Option<&Path>) -> Result<SettingsFile, EvalError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(SettingsFile::default()),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SettingsFile, EvalError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EvalError::ConfigError(format!(
                "Failed to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<SettingsFile, EvalError> {
        if content.trim().is_empty() {
            return Ok(SettingsFile::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| EvalError::ConfigError(format!("Failed to parse settings YAML: {}", e)))
    }

    fn load_env_files(file: &SettingsFile) -> Result<(), EvalError> {
        for env_file in &file.env_files {
            if env_file.exists() {
                Self::load_env_file(env_file)?;
            }
        }
        Ok(())
    }

    /// Loads `KEY=VALUE` lines into the process environment. Variables that
    /// are already set keep their value.
    pub fn load_env_file<P: AsRef<Path>>(path: P) -> Result<(), EvalError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EvalError::ConfigError(format!(
                "Failed to read env file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        for (key, value) in parse_env_lines(&content) {
            if env::var_os(&key).is_none() {
                env::set_var(key, value);
            }
        }

        Ok(())
    }

    pub fn resolve_with<F>(file: &SettingsFile, lookup: F) -> Result<EvalSettings, EvalError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let names = &file.environment;
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| {
                    EvalError::ConfigError(format!(
                        "Environment variable {} is not set",
                        name
                    ))
                })
        };

        let endpoint = EndpointConfig {
            base_url: required(&names.base_url_env)?,
            api_key: required(&names.api_key_env)?,
        };

        let judge_model = file
            .judge
            .model
            .clone()
            .or_else(|| lookup(&names.judge_model_env))
            .unwrap_or_else(default_judge_model);

        Ok(EvalSettings {
            endpoint,
            tool_api: Self::resolve_tool_api(file, &lookup),
            judge: JudgeConfig {
                enabled: file.judge.enabled,
                model: judge_model,
            },
            retry: file.retry.clone(),
            runner: file.runner.clone(),
        })
    }

    pub fn resolve_tool_api<F>(file: &SettingsFile, lookup: F) -> ToolApiConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        ToolApiConfig {
            api_key: lookup(&file.environment.tool_api_key_env),
            timeout_secs: file.tool_api.timeout_secs,
        }
    }
}

fn parse_env_lines(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim().trim_matches('"').trim_matches('\'');
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}
