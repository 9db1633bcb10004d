//! Core type definitions for examples, conversations and model exchanges
//!
//! Two conversation shapes live here. [`Turn`] is the benchmark's shape: it is
//! what datasets contain and what result records persist. [`Message`] is the
//! wire-facing shape handed to model clients; it carries the tool call ids
//! that chat-completion APIs need to pair tool results with their calls.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    #[serde(alias = "observation")]
    Tool,
}

/// A function invocation, either scripted in a gold trace or emitted by a model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Arguments as a JSON object. Some datasets and models encode the
    /// argument object as a JSON string; those are decoded here. Returns
    /// `None` when the arguments are not an object in either form.
    pub fn arguments_object(&self) -> Option<Map<String, Value>> {
        match &self.arguments {
            Value::Object(map) => Some(map.clone()),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            },
            Value::Null => Some(Map::new()),
            _ => None,
        }
    }

    pub fn canonical_arguments(&self) -> Option<Value> {
        self.arguments_object()
            .map(|map| canonicalize(&Value::Object(map)))
    }

    /// Value equality on name and canonical arguments.
    pub fn matches(&self, other: &FunctionCall) -> bool {
        if self.name != other.name {
            return false;
        }
        match (self.canonical_arguments(), other.canonical_arguments()) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
    }
}

/// Normalizes a JSON value for comparison: entries holding `null` are dropped
/// from objects and integral floats become integers. Key order never matters
/// for `serde_json` objects, so no reordering is needed.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(number) if number.is_f64() => match number.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
                Value::from(f as i64)
            }
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Vec<FunctionCall>>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(Value::String(text.into())),
            function_call: None,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(Value::String(text.into())),
            function_call: None,
        }
    }

    pub fn assistant_calls(calls: Vec<FunctionCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            function_call: Some(calls),
        }
    }

    pub fn tool(content: Value) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content),
            function_call: None,
        }
    }

    /// An assistant turn that invokes at least one function.
    pub fn is_function_call_turn(&self) -> bool {
        self.role == Role::Assistant
            && self
                .function_call
                .as_ref()
                .is_some_and(|calls| !calls.is_empty())
    }

    /// An assistant turn that answers in free text.
    pub fn is_final_answer(&self) -> bool {
        self.role == Role::Assistant && !self.is_function_call_turn() && self.text().is_some()
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(Value::as_str)
    }

    /// Content rendered as text; structured tool output is serialized as JSON.
    pub fn content_as_text(&self) -> String {
        match &self.content {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

/// Function definition offered to the model as an available tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_schema", alias = "input_schema")]
    pub parameters: Value,
}

fn empty_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolMetadata {
    /// Definition for a function known only by name, with an open schema.
    pub fn open(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: empty_schema(),
        }
    }
}

/// One benchmark example: a scripted gold conversation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Example {
    pub id: String,
    pub conversations: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<ToolMetadata>,
}

impl Example {
    /// Text of the first user turn.
    pub fn query(&self) -> Option<&str> {
        self.conversations
            .iter()
            .find(|turn| turn.role == Role::User)
            .and_then(Turn::text)
    }

    /// The system and user turns preceding the first assistant turn.
    pub fn leading_turns(&self) -> &[Turn] {
        let end = self
            .conversations
            .iter()
            .position(|turn| !matches!(turn.role, Role::System | Role::User))
            .unwrap_or(self.conversations.len());
        &self.conversations[..end]
    }

    /// Gold assistant turns that invoke functions, in order.
    pub fn gold_call_turns(&self) -> impl Iterator<Item = &[FunctionCall]> {
        self.conversations
            .iter()
            .filter(|turn| turn.is_function_call_turn())
            .filter_map(|turn| turn.function_call.as_deref())
    }

    /// The gold conversation's final free-text answer.
    pub fn reference_answer(&self) -> Option<&str> {
        self.conversations
            .iter()
            .rev()
            .find(|turn| turn.is_final_answer())
            .and_then(Turn::text)
    }

    /// Tools offered to the model. When the example carries no definitions,
    /// every function named in the gold trace is offered with an open schema.
    pub fn offered_tools(&self) -> Vec<ToolMetadata> {
        if !self.functions.is_empty() {
            return self.functions.clone();
        }
        let mut names: Vec<&str> = Vec::new();
        for call in self.gold_call_turns().flatten() {
            if !names.contains(&call.name.as_str()) {
                names.push(&call.name);
            }
        }
        names.into_iter().map(ToolMetadata::open).collect()
    }
}

/// Chat message exchanged with a model client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn from_turn(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content_as_text(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn to_function_call(&self) -> FunctionCall {
        FunctionCall::new(self.name.clone(), self.arguments.clone())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The next assistant turn produced by a model client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LLMResponse {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl LLMResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: None,
            finish_reason: None,
            usage: None,
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls: Some(tool_calls),
            finish_reason: None,
            usage: None,
        }
    }
}
