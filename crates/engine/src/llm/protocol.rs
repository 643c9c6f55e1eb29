//! Wire formats exchanged with the model: the message array sent in, the
//! tagged tool-call block that may come back, and the tool result fed back.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

pub const TOOL_CALL_START: &str = "<tool_call>";
pub const TOOL_CALL_END: &str = "</tool_call>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

struct Conversation<'a> {
    history: &'a [Message],
    next: &'a Message,
}

impl Serialize for Conversation<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.history.iter().chain(std::iter::once(self.next)))
    }
}

/// JSON array of `{role, content}`: `history` in order, then `next`.
pub fn serialize_conversation(history: &[Message], next: &Message) -> String {
    // Only strings and a unit enum; serialization cannot fail.
    serde_json::to_string(&Conversation { history, next }).unwrap_or_else(|_| "[]".to_string())
}

pub fn contains_tool_call(text: &str) -> bool {
    text.contains(TOOL_CALL_START)
}

/// Trimmed content between the first start tag and the end tag after it.
pub fn extract_tool_call_block(text: &str) -> Option<&str> {
    let start = text.find(TOOL_CALL_START)? + TOOL_CALL_START.len();
    let len = text[start..].find(TOOL_CALL_END)?;
    Some(text[start..start + len].trim())
}

/// Scalar argument value as it arrived from the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Number(value) => write!(f, "{value}"),
            ArgValue::Bool(value) => write!(f, "{value}"),
            ArgValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(number) => number
                .as_f64()
                .map(ArgValue::Number)
                .unwrap_or_else(|| ArgValue::Text(number.to_string())),
            Value::Bool(flag) => ArgValue::Bool(flag),
            Value::String(text) => ArgValue::Text(text),
            other => ArgValue::Text(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: BTreeMap<String, ArgValue>,
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolCallParseError {
    #[error("invalid tool call json: {0}")]
    Json(String),
    #[error("tool call arguments must be a JSON object")]
    ArgumentsNotObject,
}

/// Parses `{"name": ..., "arguments": {...}}`. Some models emit `arguments`
/// as a JSON string; that form is accepted too.
pub fn parse_tool_call(block: &str) -> Result<ToolCall, ToolCallParseError> {
    let raw: RawToolCall =
        serde_json::from_str(block).map_err(|err| ToolCallParseError::Json(err.to_string()))?;

    let arguments = match raw.arguments {
        Value::Null => serde_json::Map::new(),
        Value::Object(map) => map,
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            _ => return Err(ToolCallParseError::ArgumentsNotObject),
        },
        _ => return Err(ToolCallParseError::ArgumentsNotObject),
    };

    Ok(ToolCall {
        name: raw.name,
        arguments: arguments
            .into_iter()
            .map(|(key, value)| (key, ArgValue::from(value)))
            .collect(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolResult {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOutput {
    pub result: ToolResult,
    pub output: BTreeMap<String, Value>,
}

impl ToolCallOutput {
    pub fn success() -> Self {
        Self {
            result: ToolResult::Success,
            output: BTreeMap::new(),
        }
    }

    pub fn failed() -> Self {
        Self {
            result: ToolResult::Failed,
            output: BTreeMap::new(),
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.output.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.result == ToolResult::Success
    }
}

#[derive(Debug, Serialize)]
struct ToolMessage<'a> {
    name: &'a str,
    result: ToolResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<&'a BTreeMap<String, Value>>,
}

/// Content of the `tool` message appended after an execution. The output map
/// is only reported back on success.
pub fn tool_message(name: &str, outcome: Option<&ToolCallOutput>) -> String {
    let message = match outcome {
        Some(outcome) if outcome.is_success() => ToolMessage {
            name,
            result: ToolResult::Success,
            output: Some(&outcome.output),
        },
        _ => ToolMessage {
            name,
            result: ToolResult::Failed,
            output: None,
        },
    };
    serde_json::to_string(&message).unwrap_or_else(|_| format!("{{\"name\":\"{name}\"}}"))
}
