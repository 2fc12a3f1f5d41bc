// SPDX-License-Identifier: Apache-2.0

//! AI provider traits and shared implementations.
//!
//! [`AiProvider`] is the object-safe contract every backend implements.
//! [`ChatCompletionsBackend`] carries default request, retry, streaming and
//! tool-call handling for backends speaking the chat-completions protocol;
//! those backends only supply accessors.

use std::future::Future;

use anyhow::{Context, Result};
use async_trait::async_trait;
use backon::Retryable;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument, warn};

use super::sse;
use super::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatTool,
    FunctionCall, FunctionCallResult, FunctionDeclaration, GenerateOptions, TextStream,
    normalize_args,
};
use crate::error::RepoMindError;
use crate::retry::{extract_retry_after, is_retryable_anyhow, retry_backoff};

/// Uniform text-generation contract.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Provider name (e.g. "gemini", "cluster-ai").
    fn name(&self) -> &str;

    /// Default model used when options do not override it.
    fn model(&self) -> &str;

    /// Single-shot completion.
    async fn generate_content(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;

    /// Streaming completion yielding text increments as they arrive.
    async fn generate_content_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream>;

    /// Completion with function calling, normalized to [`FunctionCallResult`].
    async fn generate_with_functions(
        &self,
        prompt: &str,
        functions: &[FunctionDeclaration],
        options: &GenerateOptions,
    ) -> Result<FunctionCallResult>;

    /// Reports whether the backend is reachable.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Maps a non-success response into a typed error.
///
/// 401 names the credential variable; 429 becomes
/// [`RepoMindError::RateLimited`] with the `Retry-After` value; anything else
/// becomes [`RepoMindError::AI`] carrying the status and body.
pub(crate) async fn ensure_success(
    response: Response,
    provider: &str,
    api_key_env: &str,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        warn!("Rate limited by {provider} API");
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        debug!(retry_after, "Parsed Retry-After header");
        return Err(RepoMindError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        }
        .into());
    }

    let message = if status.as_u16() == 401 {
        format!("Invalid {provider} API key. Check your {api_key_env} environment variable.")
    } else {
        let body = response.text().await.unwrap_or_default();
        format!("{provider} API error (HTTP {}): {body}", status.as_u16())
    };
    Err(RepoMindError::AI {
        message,
        status: Some(status.as_u16()),
        provider: provider.to_string(),
    }
    .into())
}

/// Runs `op` with exponential backoff on transient failures.
pub(crate) async fn with_retry<T, F, Fut>(provider: &str, max_retries: usize, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    op.retry(retry_backoff(max_retries))
        .when(is_retryable_anyhow)
        .notify(|err, dur| {
            let retry_after = extract_retry_after(err);
            warn!(error = %err, delay = ?dur, ?retry_after, provider, "Retrying after error");
        })
        .await
}

/// Sends a prepared request and maps transport errors to [`RepoMindError::Network`].
pub(crate) async fn send(request: RequestBuilder) -> Result<Response> {
    request
        .send()
        .await
        .map_err(|e| RepoMindError::Network(e).into())
}

/// Error for a response that parsed but held nothing usable.
pub(crate) fn empty_response(provider: &str) -> anyhow::Error {
    RepoMindError::AI {
        message: format!("No usable response from {provider}"),
        status: None,
        provider: provider.to_string(),
    }
    .into()
}

/// Shared behavior for chat-completions backends.
///
/// Implementors provide accessors; request building, error mapping, retries,
/// streaming and tool-call normalization come from the default methods.
#[async_trait]
pub trait ChatCompletionsBackend: Send + Sync {
    /// Provider name for logs and errors.
    fn provider_name(&self) -> &str;

    /// Full chat-completions URL.
    fn chat_url(&self) -> &str;

    /// Environment variable holding the API key.
    fn api_key_env(&self) -> &str;

    /// HTTP client.
    fn http_client(&self) -> &Client;

    /// Bearer token, if the endpoint needs one.
    fn api_key(&self) -> Option<&SecretString>;

    /// Default model.
    fn default_model(&self) -> &str;

    /// Default maximum tokens.
    fn max_tokens(&self) -> u32;

    /// Default temperature.
    fn temperature(&self) -> f32;

    /// Retries for transient failures.
    fn max_retries(&self) -> usize;

    /// Builds a request from a prompt and options.
    fn build_request(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        tools: Option<&[FunctionDeclaration]>,
        stream: bool,
    ) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &options.system {
            messages.push(ChatMessage::text("system", system.clone()));
        }
        messages.push(ChatMessage::text("user", prompt));

        let tools = tools
            .or(options.tools.as_deref())
            .filter(|t| !t.is_empty())
            .map(|t| t.iter().map(ChatTool::from).collect());

        ChatCompletionRequest {
            model: options
                .model
                .clone()
                .unwrap_or_else(|| self.default_model().to_string()),
            messages,
            max_tokens: Some(options.max_tokens.unwrap_or_else(|| self.max_tokens())),
            temperature: Some(options.temperature.unwrap_or_else(|| self.temperature())),
            top_p: options.top_p,
            tools,
            stream,
        }
    }

    /// POSTs a request and checks the status (no retry).
    async fn post_chat(&self, request: &ChatCompletionRequest) -> Result<Response> {
        let mut req = self.http_client().post(self.chat_url()).json(request);
        if let Some(key) = self.api_key() {
            req = req.bearer_auth(key.expose_secret());
        }
        let response = send(req).await?;
        ensure_success(response, self.provider_name(), self.api_key_env()).await
    }

    /// Sends a non-streaming request with retry and parses the completion.
    async fn send_chat(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        with_retry(self.provider_name(), self.max_retries(), || async {
            let response = self.post_chat(request).await?;
            let text = response.text().await.map_err(RepoMindError::Network)?;
            serde_json::from_str::<ChatCompletionResponse>(&text)
                .map_err(|e| RepoMindError::InvalidAIResponse(e).into())
        })
        .await
    }

    /// Text of the first choice. Tool calls without text yield whatever text is present.
    #[instrument(skip(self, prompt, options), fields(provider = %self.provider_name()))]
    async fn chat_content(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let request = self.build_request(prompt, options, None, false);
        debug!(model = %request.model, "Calling {} API", self.provider_name());
        let completion = self.send_chat(&request).await?;

        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| empty_response(self.provider_name()))?;

        if message.content.is_none() && !message.tool_calls.is_empty() {
            debug!(
                calls = message.tool_calls.len(),
                "Response held only tool calls, returning empty text"
            );
        }
        Ok(message.content.unwrap_or_default())
    }

    /// Streams content deltas from the first choice.
    async fn chat_content_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream> {
        let request = self.build_request(prompt, options, None, true);
        let response =
            with_retry(self.provider_name(), self.max_retries(), || self.post_chat(&request))
                .await?;

        let deltas = sse::data_events(response).filter_map(|event| async move {
            match event {
                Ok(data) => match serde_json::from_str::<ChatCompletionChunk>(&data) {
                    Ok(chunk) => chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.content)
                        .filter(|text| !text.is_empty())
                        .map(Ok),
                    Err(e) => {
                        debug!(error = %e, "Skipping unparseable stream chunk");
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(deltas))
    }

    /// Function calling through `tools`, with arguments parsed into objects.
    #[instrument(skip(self, prompt, functions, options), fields(provider = %self.provider_name()))]
    async fn chat_with_functions(
        &self,
        prompt: &str,
        functions: &[FunctionDeclaration],
        options: &GenerateOptions,
    ) -> Result<FunctionCallResult> {
        let request = self.build_request(prompt, options, Some(functions), false);
        let completion = self.send_chat(&request).await?;

        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .context("No choices in chat completion response")?;

        let function_calls = message
            .tool_calls
            .into_iter()
            .map(|call| FunctionCall {
                name: call.function.name,
                args: normalize_args(call.function.arguments),
            })
            .collect();

        Ok(FunctionCallResult {
            function_calls,
            text: message.content.filter(|t| !t.is_empty()),
        })
    }
}
