// SPDX-License-Identifier: Apache-2.0

//! Provider-neutral request options and function-calling types, plus the
//! chat-completions wire format shared by `OpenAI`-style backends.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lazy, forward-only sequence of text increments. Dropping it cancels the
/// underlying request.
pub type TextStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// Per-call generation options. Unset fields fall back to provider defaults.
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct GenerateOptions {
    /// Model override.
    #[builder(into)]
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum output tokens.
    pub max_tokens: Option<u32>,
    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,
    /// Explicit tools. Gemini enables web search when this is `None`.
    pub tools: Option<Vec<FunctionDeclaration>>,
    /// System instruction placed ahead of the prompt.
    #[builder(into)]
    pub system: Option<String>,
}

/// A callable function described to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    /// Function name.
    pub name: String,
    /// What the function does, for the model.
    pub description: String,
    /// JSON-schema object describing the arguments.
    pub parameters: Value,
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Declared function name.
    pub name: String,
    /// Parsed arguments; always a JSON object.
    pub args: Value,
}

/// Normalized function-calling result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallResult {
    /// Requested calls, in the order the model emitted them.
    pub function_calls: Vec<FunctionCall>,
    /// Accompanying text, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Coerces tool-call arguments into a JSON object.
///
/// Backends send arguments as an object or as a JSON-encoded string;
/// anything unparseable becomes an empty object.
#[must_use]
pub fn normalize_args(raw: Value) -> Value {
    match raw {
        Value::Object(_) => raw,
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => Value::Object(serde_json::Map::new()),
        },
        _ => Value::Object(serde_json::Map::new()),
    }
}

// ============================================================================
// Chat completions wire format
// ============================================================================

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant".
    pub role: String,
    /// Message content; absent when the message only carries tool calls.
    #[serde(default)]
    pub content: Option<String>,
    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    /// Plain text message.
    #[must_use]
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// Function tool offered to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTool {
    /// Always `function`.
    #[serde(rename = "type")]
    pub tool_type: String,
    /// The function.
    pub function: FunctionDeclaration,
}

impl From<&FunctionDeclaration> for ChatTool {
    fn from(decl: &FunctionDeclaration) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: decl.clone(),
        }
    }
}

/// Tool call in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id.
    #[serde(default)]
    pub id: String,
    /// Called function.
    pub function: ToolCallFunction,
}

/// Function name and arguments of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Function name.
    pub name: String,
    /// Arguments, usually a JSON-encoded string.
    #[serde(default)]
    pub arguments: Value,
}

/// Request body for chat completions.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens in response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Temperature for response randomness.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Offered tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    /// Server-sent event streaming.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// Response from chat completions.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    /// List of choices (usually just one).
    pub choices: Vec<Choice>,
}

/// A single choice in the chat completion response.
#[derive(Debug, Deserialize)]
pub struct Choice {
    /// The generated message.
    pub message: ChatMessage,
}

/// One streamed chunk.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    /// Incremental choices.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// Incremental choice in a streamed chunk.
#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    /// Content delta.
    #[serde(default)]
    pub delta: ChunkDelta,
}

/// Content delta.
#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    /// New text, if any.
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_args_parses_string_arguments() {
        assert_eq!(
            normalize_args(json!("{\"files\":[\"a.rs\"]}")),
            json!({"files": ["a.rs"]})
        );
        assert_eq!(normalize_args(json!({"x": 1})), json!({"x": 1}));
        assert_eq!(normalize_args(json!("not json")), json!({}));
        assert_eq!(normalize_args(json!("[1,2]")), json!({}));
        assert_eq!(normalize_args(Value::Null), json!({}));
    }

    #[test]
    fn message_without_content_deserializes() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{"id": "c1", "type": "function", "function": {"name": "f", "arguments": "{}"}}]
        }))
        .expect("parse");
        assert!(msg.content.is_none());
        assert_eq!(msg.tool_calls[0].function.name, "f");
    }

    #[test]
    fn request_omits_unset_fields() {
        let request = ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::text("user", "hi")],
            max_tokens: None,
            temperature: Some(0.2),
            top_p: None,
            tools: None,
            stream: false,
        };
        let body = serde_json::to_value(&request).expect("serialize");
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("stream").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn options_builder_accepts_str() {
        let options = GenerateOptions::builder()
            .model("gpt-4o")
            .temperature(0.1)
            .build();
        assert_eq!(options.model.as_deref(), Some("gpt-4o"));
        assert!(options.tools.is_none());
    }
}
