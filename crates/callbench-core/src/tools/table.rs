//! Tool definition table: provider id → per-operation request templates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Where mapped arguments go when the method default is not wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Query,
    Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDefinition {
    #[serde(default)]
    pub method: HttpMethod,
    pub path: String,
    #[serde(default)]
    pub description: String,
    /// Argument name → request field name. Unlisted arguments keep their name.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<ParameterLocation>,
}

impl OperationDefinition {
    pub fn parameter_location(&self) -> ParameterLocation {
        self.location.unwrap_or(match self.method {
            HttpMethod::Get => ParameterLocation::Query,
            HttpMethod::Post => ParameterLocation::Body,
        })
    }

    pub fn field_name<'a>(&'a self, argument: &'a str) -> &'a str {
        self.parameters
            .get(argument)
            .map(String::as_str)
            .unwrap_or(argument)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDefinition {
    pub base_url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Header carrying the tool API key, e.g. `x-rapidapi-key`.
    #[serde(default)]
    pub key_header: Option<String>,
    #[serde(default)]
    pub operations: BTreeMap<String, OperationDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ToolTable {
    pub providers: BTreeMap<String, ProviderDefinition>,
}

impl ToolTable {
    /// Loads a table from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self, EvalError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EvalError::ConfigError(format!(
                "Failed to read tool table {}: {}",
                path.display(),
                e
            ))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn from_json(content: &str) -> Result<Self, EvalError> {
        serde_json::from_str(content)
            .map_err(|e| EvalError::ConfigError(format!("Invalid tool table: {}", e)))
    }

    pub fn from_yaml(content: &str) -> Result<Self, EvalError> {
        serde_yaml::from_str(content)
            .map_err(|e| EvalError::ConfigError(format!("Invalid tool table: {}", e)))
    }

    pub fn operation_count(&self) -> usize {
        self.providers.values().map(|p| p.operations.len()).sum()
    }
}
