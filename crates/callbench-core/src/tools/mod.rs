//! Tool invocation against external data APIs
//!
//! Model-emitted function calls are executed through a [`ToolInvoker`]. The
//! default invoker is a [`ToolRegistry`] populated from a tool definition
//! table: every operation of every provider becomes a [`Tool`] registered
//! under the composite id `"<provider>.<operation>"`. Invokers never retry;
//! callers wrap them in a [`crate::retry::RetryPolicy`] so that tool calls and
//! model calls share one retry behavior.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::config::ToolApiConfig;
use crate::core_types::{canonicalize, ToolMetadata};
use crate::errors::EvalError;

pub mod rest;
pub mod table;

pub use rest::RestApiTool;
pub use table::{HttpMethod, OperationDefinition, ProviderDefinition, ToolTable};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("tool name '{name}' is ambiguous, candidates: {candidates:?}")]
    AmbiguousTool {
        name: String,
        candidates: Vec<String>,
    },
    #[error("invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("request to '{tool}' failed: {message}")]
    Transport { tool: String, message: String },
    #[error("'{tool}' rejected the request with status {status}: {body}")]
    Rejected {
        tool: String,
        status: u16,
        body: String,
    },
}

impl ToolError {
    /// Network failures and rate limiting are worth another attempt; every
    /// other failure is an answer the model should see.
    pub fn is_transient(&self) -> bool {
        match self {
            ToolError::Transport { .. } => true,
            ToolError::Rejected { status, .. } => *status == 429,
            _ => false,
        }
    }

    /// Tool-turn content describing this failure.
    pub fn to_observation(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

impl From<ToolError> for EvalError {
    fn from(err: ToolError) -> Self {
        let tool_name = match &err {
            ToolError::UnknownTool(name) => name.clone(),
            ToolError::AmbiguousTool { name, .. } => name.clone(),
            ToolError::InvalidArguments { tool, .. }
            | ToolError::Transport { tool, .. }
            | ToolError::Rejected { tool, .. } => tool.clone(),
        };
        EvalError::ToolError {
            tool_name,
            message: err.to_string(),
        }
    }
}

/// A single callable operation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn metadata(&self) -> ToolMetadata;
    async fn execute(&self, arguments: &Value) -> Result<Value, ToolError>;
}

/// Executes a function call by name.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn call(&self, tool_name: &str, arguments: &Value) -> Result<Value, ToolError>;
}

/// Whether two tool results are the same answer. Used to decide if two
/// differently-spelled calls hit the same API behavior.
pub fn responses_equal(left: &Value, right: &Value) -> bool {
    canonicalize(left) == canonicalize(right)
}

// Tool registry keyed by composite id
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    by_operation: BTreeMap<String, Vec<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            by_operation: BTreeMap::new(),
        }
    }

    /// Builds one [`RestApiTool`] per operation of every provider in `table`.
    pub fn from_table(table: &ToolTable, api: &ToolApiConfig) -> Result<Self, EvalError> {
        let client = reqwest::Client::builder()
            .timeout(api.timeout())
            .build()
            .map_err(|e| EvalError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        let mut registry = Self::new();
        for (provider_id, provider) in &table.providers {
            let provider = Arc::new(provider.clone());
            for operation in provider.operations.keys() {
                let tool = RestApiTool::new(
                    client.clone(),
                    provider_id.clone(),
                    provider.clone(),
                    operation.clone(),
                    api.api_key.clone(),
                );
                registry.register_tool(provider_id, operation, Arc::new(tool));
            }
        }
        log::debug!("Tool registry built with {} operations", registry.tool_count());
        Ok(registry)
    }

    pub fn register_tool(&mut self, provider: &str, operation: &str, tool: Arc<dyn Tool>) {
        let id = format!("{}.{}", provider, operation);
        self.by_operation
            .entry(operation.to_string())
            .or_default()
            .push(id.clone());
        self.tools.insert(id, tool);
    }

    /// Looks up a composite id first, then a bare operation name if exactly
    /// one provider offers it.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        if let Some(tool) = self.tools.get(name) {
            return Ok(tool.clone());
        }
        match self.by_operation.get(name).map(Vec::as_slice) {
            Some([id]) => self
                .tools
                .get(id)
                .cloned()
                .ok_or_else(|| ToolError::UnknownTool(name.to_string())),
            Some(candidates) if candidates.len() > 1 => Err(ToolError::AmbiguousTool {
                name: name.to_string(),
                candidates: candidates.to_vec(),
            }),
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }

    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        self.tools.values().map(|tool| tool.metadata()).collect()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn call(&self, tool_name: &str, arguments: &Value) -> Result<Value, ToolError> {
        let tool = self.resolve(tool_name)?;
        log::debug!("Invoking tool '{}' with {}", tool_name, arguments);
        tool.execute(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool {
        name: String,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn metadata(&self) -> ToolMetadata {
            ToolMetadata::open(self.name.clone())
        }

        async fn execute(&self, arguments: &Value) -> Result<Value, ToolError> {
            Ok(json!({ "tool": self.name, "arguments": arguments }))
        }
    }

    fn echo(name: &str) -> Arc<dyn Tool> {
        Arc::new(EchoTool {
            name: name.to_string(),
        })
    }

    #[tokio::test]
    async fn test_resolution_by_composite_and_bare_name() {
        let mut registry = ToolRegistry::new();
        registry.register_tool("booking-com15", "Search_Hotel_Destination", echo("a"));
        registry.register_tool("booking-com15", "Search_Flights", echo("b"));
        assert_eq!(registry.tool_count(), 2);

        let by_id = registry
            .call("booking-com15.Search_Flights", &json!({}))
            .await
            .unwrap();
        assert_eq!(by_id["tool"], "b");

        let by_name = registry
            .call("Search_Hotel_Destination", &json!({"query": "Paris"}))
            .await
            .unwrap();
        assert_eq!(by_name["tool"], "a");
        assert_eq!(by_name["arguments"]["query"], "Paris");
    }

    #[tokio::test]
    async fn test_ambiguous_and_unknown_names() {
        let mut registry = ToolRegistry::new();
        registry.register_tool("provider-a", "Search", echo("a"));
        registry.register_tool("provider-b", "Search", echo("b"));

        match registry.call("Search", &json!({})).await {
            Err(ToolError::AmbiguousTool { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {:?}", other.map(|_| ())),
        }
        assert_eq!(
            registry.call("provider-a.Search", &json!({})).await.unwrap()["tool"],
            "a"
        );
        assert!(matches!(
            registry.call("Missing", &json!({})).await,
            Err(ToolError::UnknownTool(_))
        ));
    }

    #[test]
    fn test_transient_classification() {
        let transport = ToolError::Transport {
            tool: "t".into(),
            message: "connection reset".into(),
        };
        let limited = ToolError::Rejected {
            tool: "t".into(),
            status: 429,
            body: String::new(),
        };
        let rejected = ToolError::Rejected {
            tool: "t".into(),
            status: 400,
            body: "bad query".into(),
        };
        assert!(transport.is_transient());
        assert!(limited.is_transient());
        assert!(!rejected.is_transient());
        assert!(rejected.to_observation()["error"]
            .as_str()
            .unwrap()
            .contains("400"));
    }

    #[test]
    fn test_responses_equal_ignores_key_order() {
        let left = json!({"data": [{"dest_id": "-1456928", "type": "city"}], "status": true});
        let right = json!({"status": true, "data": [{"type": "city", "dest_id": "-1456928"}]});
        assert!(responses_equal(&left, &right));
        assert!(!responses_equal(&left, &json!({"status": false})));
    }
}
