// SPDX-License-Identifier: Apache-2.0

//! Google Gemini backend over the native `generateContent` API.
//!
//! When the caller supplies no tools, requests enable the built-in
//! `google_search` tool so answers can draw on the web.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::provider::{AiProvider, empty_response, ensure_success, send, with_retry};
use super::sse;
use super::types::{
    FunctionCall, FunctionCallResult, FunctionDeclaration, GenerateOptions, TextStream,
    normalize_args,
};
use super::{GEMINI_API_KEY_ENV, GEMINI_API_URL, GEMINI_DEFAULT_MODEL};
use crate::config::AiConfig;
use crate::error::RepoMindError;

/// Gemini client.
pub struct GeminiClient {
    http: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: usize,
}

impl GeminiClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RepoMindError::MissingCredential`] when no API key is
    /// configured, or an error if the HTTP client cannot be built.
    pub fn new(config: &AiConfig) -> Result<Self> {
        let api_key = config
            .gemini
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RepoMindError::MissingCredential {
                provider: "gemini".to_string(),
                env_var: GEMINI_API_KEY_ENV.to_string(),
            })?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: SecretString::new(api_key.into()),
            base_url: config
                .gemini
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config
                .gemini
                .model
                .clone()
                .unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{model}:{method}", self.base_url)
    }

    fn build_body(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        functions: Option<&[FunctionDeclaration]>,
    ) -> GenerateContentRequest {
        let tools = match functions.or(options.tools.as_deref()) {
            None => vec![json!({ "google_search": {} })],
            Some([]) => Vec::new(),
            Some(decls) => vec![json!({ "functionDeclarations": decls })],
        };

        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(prompt)],
            }],
            system_instruction: options.system.as_ref().map(|system| Content {
                role: None,
                parts: vec![Part::text(system)],
            }),
            generation_config: GenerationConfig {
                temperature: options.temperature.unwrap_or(self.temperature),
                max_output_tokens: options.max_tokens.unwrap_or(self.max_tokens),
                top_p: options.top_p,
            },
            tools,
        }
    }

    async fn post(&self, url: &str, body: &GenerateContentRequest) -> Result<reqwest::Response> {
        let request = self
            .http
            .post(url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(body);
        let response = send(request).await?;
        ensure_success(response, "gemini", GEMINI_API_KEY_ENV).await
    }

    async fn call(&self, model: &str, body: &GenerateContentRequest) -> Result<GenerateContentResponse> {
        let url = self.endpoint(model, "generateContent");
        with_retry("gemini", self.max_retries, || async {
            let response = self.post(&url, body).await?;
            let text = response.text().await.map_err(RepoMindError::Network)?;
            serde_json::from_str::<GenerateContentResponse>(&text)
                .map_err(|e| RepoMindError::InvalidAIResponse(e).into())
        })
        .await
    }

    fn model_for<'a>(&'a self, options: &'a GenerateOptions) -> &'a str {
        options.model.as_deref().unwrap_or(&self.model)
    }
}

#[async_trait]
impl AiProvider for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, prompt, options), fields(model = %self.model_for(options)))]
    async fn generate_content(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let body = self.build_body(prompt, options, None);
        let response = self.call(self.model_for(options), &body).await?;
        response
            .text()
            .ok_or_else(|| empty_response("gemini"))
    }

    async fn generate_content_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream> {
        let body = self.build_body(prompt, options, None);
        let url = format!(
            "{}?alt=sse",
            self.endpoint(self.model_for(options), "streamGenerateContent")
        );
        let response = with_retry("gemini", self.max_retries, || self.post(&url, &body)).await?;

        let chunks = sse::data_events(response).filter_map(|event| async move {
            match event {
                Ok(data) => match serde_json::from_str::<GenerateContentResponse>(&data) {
                    Ok(chunk) => chunk.text().filter(|t| !t.is_empty()).map(Ok),
                    Err(e) => {
                        debug!(error = %e, "Skipping unparseable Gemini chunk");
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(chunks))
    }

    #[instrument(skip_all, fields(functions = functions.len()))]
    async fn generate_with_functions(
        &self,
        prompt: &str,
        functions: &[FunctionDeclaration],
        options: &GenerateOptions,
    ) -> Result<FunctionCallResult> {
        let body = self.build_body(prompt, options, Some(functions));
        let response = self.call(self.model_for(options), &body).await?;

        let parts = response.first_parts();
        let function_calls = parts
            .iter()
            .filter_map(|p| p.function_call.as_ref())
            .map(|call| FunctionCall {
                name: call.name.clone(),
                args: normalize_args(call.args.clone()),
            })
            .collect();

        Ok(FunctionCallResult {
            function_calls,
            text: response.text().filter(|t| !t.is_empty()),
        })
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            function_call: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateContentResponse {
    fn first_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .map_or(&[], |c| c.content.parts.as_slice())
    }

    /// Concatenated text parts of the first candidate.
    fn text(&self) -> Option<String> {
        let parts = self.first_parts();
        if parts.iter().all(|p| p.text.is_none()) {
            return None;
        }
        Some(parts.iter().filter_map(|p| p.text.as_deref()).collect())
    }
}
