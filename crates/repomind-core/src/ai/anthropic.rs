// SPDX-License-Identifier: Apache-2.0

//! Anthropic backend over the Messages API.
//!
//! Responses are lists of content blocks; text blocks become the answer and
//! `tool_use` blocks become function calls. Tool schemas are forwarded as
//! `input_schema` with an explicit `"type": "object"` tag.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::provider::{AiProvider, empty_response, ensure_success, send, with_retry};
use super::sse;
use super::types::{
    FunctionCall, FunctionCallResult, FunctionDeclaration, GenerateOptions, TextStream,
    normalize_args,
};
use super::{ANTHROPIC_API_KEY_ENV, ANTHROPIC_API_URL, ANTHROPIC_DEFAULT_MODEL, ANTHROPIC_VERSION};
use crate::config::AiConfig;
use crate::error::RepoMindError;

/// Anthropic client.
pub struct AnthropicClient {
    http: Client,
    api_key: SecretString,
    messages_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: usize,
}

/// Copies a declaration's parameters into an Anthropic `input_schema`.
fn input_schema(parameters: &Value) -> Value {
    let mut schema = match parameters {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    schema.insert("type".to_string(), Value::String("object".to_string()));
    Value::Object(schema)
}

impl AnthropicClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RepoMindError::MissingCredential`] when no API key is configured.
    pub fn new(config: &AiConfig) -> Result<Self> {
        let api_key = config
            .anthropic
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RepoMindError::MissingCredential {
                provider: "anthropic".to_string(),
                env_var: ANTHROPIC_API_KEY_ENV.to_string(),
            })?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        let base = config
            .anthropic
            .base_url
            .as_deref()
            .unwrap_or(ANTHROPIC_API_URL)
            .trim_end_matches('/');

        Ok(Self {
            http,
            api_key: SecretString::new(api_key.into()),
            messages_url: format!("{base}/v1/messages"),
            model: config
                .anthropic
                .model
                .clone()
                .unwrap_or_else(|| ANTHROPIC_DEFAULT_MODEL.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    fn build_request(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        functions: Option<&[FunctionDeclaration]>,
        stream: bool,
    ) -> MessagesRequest {
        let tools = functions
            .or(options.tools.as_deref())
            .unwrap_or_default()
            .iter()
            .map(|decl| AnthropicTool {
                name: decl.name.clone(),
                description: decl.description.clone(),
                input_schema: input_schema(&decl.parameters),
            })
            .collect();

        MessagesRequest {
            model: options.model.clone().unwrap_or_else(|| self.model.clone()),
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            system: options.system.clone(),
            temperature: Some(options.temperature.unwrap_or(self.temperature)),
            top_p: options.top_p,
            tools,
            stream,
        }
    }

    async fn post(&self, request: &MessagesRequest) -> Result<reqwest::Response> {
        let builder = self
            .http
            .post(&self.messages_url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request);
        let response = send(builder).await?;
        ensure_success(response, "anthropic", ANTHROPIC_API_KEY_ENV).await
    }

    async fn create(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        with_retry("anthropic", self.max_retries, || async {
            let response = self.post(request).await?;
            let text = response.text().await.map_err(RepoMindError::Network)?;
            serde_json::from_str::<MessagesResponse>(&text)
                .map_err(|e| RepoMindError::InvalidAIResponse(e).into())
        })
        .await
    }
}

#[async_trait]
impl AiProvider for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate_content(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let request = self.build_request(prompt, options, None, false);
        let response = self.create(&request).await?;
        response.text().ok_or_else(|| empty_response("anthropic"))
    }

    async fn generate_content_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream> {
        let request = self.build_request(prompt, options, None, true);
        let response = with_retry("anthropic", self.max_retries, || self.post(&request)).await?;

        let deltas = sse::data_events(response).filter_map(|event| async move {
            let data = match event {
                Ok(data) => data,
                Err(e) => return Some(Err(e)),
            };
            match serde_json::from_str::<StreamEvent>(&data) {
                Ok(StreamEvent::ContentBlockDelta {
                    delta: BlockDelta::TextDelta { text },
                }) if !text.is_empty() => Some(Ok(text)),
                Ok(StreamEvent::Error { error }) => Some(Err(RepoMindError::AI {
                    message: error.message,
                    status: None,
                    provider: "anthropic".to_string(),
                }
                .into())),
                Ok(_) => None,
                Err(e) => {
                    debug!(error = %e, "Skipping unparseable Anthropic event");
                    None
                }
            }
        });
        Ok(Box::pin(deltas))
    }

    #[instrument(skip_all, fields(functions = functions.len()))]
    async fn generate_with_functions(
        &self,
        prompt: &str,
        functions: &[FunctionDeclaration],
        options: &GenerateOptions,
    ) -> Result<FunctionCallResult> {
        let request = self.build_request(prompt, options, Some(functions), false);
        let response = self.create(&request).await?;

        let text = response.text().filter(|t| !t.is_empty());
        let function_calls = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { name, input } => Some(FunctionCall {
                    name,
                    args: normalize_args(input),
                }),
                _ => None,
            })
            .collect();

        Ok(FunctionCallResult {
            function_calls,
            text,
        })
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

impl MessagesResponse {
    /// Concatenated text blocks, or `None` if there are none.
    fn text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.concat())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: BlockDelta },
    Error { error: StreamError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}
