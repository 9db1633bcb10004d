use crate::core_types::{LLMResponse, Message, Role, ToolCall, Usage};
use crate::errors::EvalError;
use crate::llm::{ToolMetadata, LLM};
use async_trait::async_trait;
use reqwest::Client;

use serde_json::{json, Value};

/// Client for any endpoint speaking the OpenAI chat-completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAIClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: "https://api.openai.com/v1".to_string(),
            model,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request_body(&self, messages: &[Message], tools: Option<&[ToolMetadata]>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.format_messages(messages),
        });

        if let Some(temp) = self.temperature {
            body["temperature"] = temp.into();
        }

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }

        if let Some(tools) = tools.filter(|tools| !tools.is_empty()) {
            log::debug!("Offering {} tools to {}", tools.len(), self.model);
            let formatted_tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters
                        }
                    })
                })
                .collect();
            body["tools"] = formatted_tools.into();
            body["tool_choice"] = "auto".into();
        }

        body
    }

    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let mut message = json!({
                    "role": self.format_role(&msg.role),
                    "content": msg.content
                });

                if let Role::Tool = msg.role {
                    if let Some(tool_call_id) = &msg.tool_call_id {
                        message["tool_call_id"] = json!(tool_call_id);
                    }
                }

                if let Role::Assistant = msg.role {
                    if let Some(tool_calls) = msg.tool_calls.as_ref().filter(|c| !c.is_empty()) {
                        let formatted_tool_calls: Vec<Value> = tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id.clone().unwrap_or_else(new_call_id),
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": encode_arguments(&tc.arguments)
                                    }
                                })
                            })
                            .collect();
                        message["tool_calls"] = json!(formatted_tool_calls);
                        if msg.content.is_empty() {
                            message["content"] = Value::Null;
                        }
                    }
                }

                message
            })
            .collect()
    }

    fn format_role(&self, role: &Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    fn parse_response(&self, response: Value) -> Result<LLMResponse, EvalError> {
        let choices = response["choices"]
            .as_array()
            .ok_or_else(|| EvalError::ParsingError("No choices in response".to_string()))?;

        let choice = choices
            .first()
            .ok_or_else(|| EvalError::ParsingError("Empty choices array".to_string()))?;
        let message = &choice["message"];

        let content = message["content"]
            .as_str()
            .filter(|text| !text.trim().is_empty())
            .map(|s| s.to_string());

        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| calls.iter().filter_map(parse_tool_call).collect::<Vec<_>>())
            .filter(|calls| !calls.is_empty());

        if content.is_none() && tool_calls.is_none() {
            return Err(EvalError::ParsingError(
                "Response has neither content nor tool calls".to_string(),
            ));
        }

        let usage = serde_json::from_value::<Usage>(response["usage"].clone()).ok();

        Ok(LLMResponse {
            content,
            tool_calls,
            finish_reason: choice["finish_reason"].as_str().map(str::to_string),
            usage,
        })
    }
}

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Arguments travel as a JSON-encoded string. A string that the model
/// produced verbatim is sent back unchanged.
fn encode_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Argument strings that are not valid JSON are kept as raw strings so the
/// caller can classify them.
fn parse_tool_call(call: &Value) -> Option<ToolCall> {
    let function = call["function"].as_object()?;
    let name = function.get("name")?.as_str()?;
    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
        }
        Some(Value::Null) | None => json!({}),
        Some(other) => other.clone(),
    };
    Some(ToolCall {
        id: call["id"].as_str().map(str::to_string),
        name: name.to_string(),
        arguments,
    })
}

#[async_trait]
impl LLM for OpenAIClient {
    async fn generate(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolMetadata>>,
    ) -> Result<LLMResponse, EvalError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request_body(&messages, tools.as_deref());

        log::debug!(
            "Chat completion request to {} with {} messages",
            url,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EvalError::ModelError(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| EvalError::ModelError(format!("Failed to read response: {}", e)))?;

        log::trace!("Chat completion response ({}): {}", status, response_text);

        if !status.is_success() {
            return Err(EvalError::ModelError(format!(
                "API request failed with status {}: {}",
                status, response_text
            )));
        }

        let response_json: Value = serde_json::from_str(&response_text)
            .map_err(|e| EvalError::ParsingError(format!("Invalid JSON response: {}", e)))?;

        self.parse_response(response_json)
    }
}
