use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};

use super::table::{HttpMethod, ParameterLocation, ProviderDefinition};
use super::{Tool, ToolError};
use crate::core_types::{FunctionCall, ToolMetadata};

fn path_placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("valid placeholder regex"))
}

/// One operation of a REST data provider.
pub struct RestApiTool {
    client: Client,
    provider_id: String,
    provider: Arc<ProviderDefinition>,
    operation: String,
    api_key: Option<String>,
}

impl RestApiTool {
    pub fn new(
        client: Client,
        provider_id: String,
        provider: Arc<ProviderDefinition>,
        operation: String,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            provider_id,
            provider,
            operation,
            api_key,
        }
    }

    fn tool_id(&self) -> String {
        format!("{}.{}", self.provider_id, self.operation)
    }

    fn invalid(&self, message: impl Into<String>) -> ToolError {
        ToolError::InvalidArguments {
            tool: self.tool_id(),
            message: message.into(),
        }
    }

    /// Substitutes `{arg}` segments, consuming the arguments it uses.
    fn render_path(&self, template: &str, args: &mut Map<String, Value>) -> Result<String, ToolError> {
        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;
        for captures in path_placeholder().captures_iter(template) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let value = args
                .remove(name.as_str())
                .ok_or_else(|| self.invalid(format!("missing path argument '{}'", name.as_str())))?;
            rendered.push_str(&template[last..whole.start()]);
            rendered.push_str(&urlencoding::encode(&scalar_text(&value)));
            last = whole.end();
        }
        rendered.push_str(&template[last..]);
        Ok(rendered)
    }
}

/// Query-string rendering: strings as-is, everything else as JSON text.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Tool for RestApiTool {
    fn metadata(&self) -> ToolMetadata {
        let description = self
            .provider
            .operations
            .get(&self.operation)
            .map(|op| op.description.clone())
            .unwrap_or_default();
        ToolMetadata {
            description,
            ..ToolMetadata::open(self.operation.clone())
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<Value, ToolError> {
        let operation = self
            .provider
            .operations
            .get(&self.operation)
            .ok_or_else(|| ToolError::UnknownTool(self.tool_id()))?;

        let mut args = FunctionCall::new(self.operation.clone(), arguments.clone())
            .arguments_object()
            .ok_or_else(|| self.invalid("arguments must be a JSON object"))?;

        let path = self.render_path(&operation.path, &mut args)?;
        let url = format!("{}{}", self.provider.base_url.trim_end_matches('/'), path);

        let fields: Vec<(String, Value)> = args
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (operation.field_name(&name).to_string(), value))
            .collect();

        let mut request = match operation.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        for (name, value) in &self.provider.headers {
            request = request.header(name, value);
        }
        if let (Some(header), Some(key)) = (&self.provider.key_header, &self.api_key) {
            request = request.header(header, key);
        }
        request = match operation.parameter_location() {
            ParameterLocation::Query => {
                let query: Vec<(String, String)> = fields
                    .iter()
                    .map(|(name, value)| (name.clone(), scalar_text(value)))
                    .collect();
                request.query(&query)
            }
            ParameterLocation::Body => {
                let body: Map<String, Value> = fields.into_iter().collect();
                request.json(&Value::Object(body))
            }
        };

        log::debug!("{} {:?} {}", self.tool_id(), operation.method, url);

        let response = request.send().await.map_err(|e| ToolError::Transport {
            tool: self.tool_id(),
            message: e.to_string(),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ToolError::Transport {
            tool: self.tool_id(),
            message: format!("failed to read response: {}", e),
        })?;

        if !status.is_success() {
            return Err(ToolError::Rejected {
                tool: self.tool_id(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}
