// SPDX-License-Identifier: Apache-2.0

//! `OpenAI` and generic OpenAI-compatible backends.
//!
//! Both speak `POST {base}/chat/completions`. The hosted `OpenAI` variant
//! requires an API key; the compatible variant requires a base URL and a
//! model, and sends a bearer token only when one is configured.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::SecretString;

use super::provider::{AiProvider, ChatCompletionsBackend};
use super::types::{FunctionCallResult, FunctionDeclaration, GenerateOptions, TextStream};
use super::{
    OPENAI_API_KEY_ENV, OPENAI_API_URL, OPENAI_COMPATIBLE_API_KEY_ENV,
    OPENAI_COMPATIBLE_BASE_URL_ENV, OPENAI_COMPATIBLE_MODEL_ENV, OPENAI_DEFAULT_MODEL,
};
use crate::config::{AiConfig, BackendConfig};
use crate::error::RepoMindError;

/// Client for an OpenAI-style chat-completions endpoint.
#[derive(Debug)]
pub struct OpenAiClient {
    name: &'static str,
    http: Client,
    api_key: Option<SecretString>,
    api_key_env: &'static str,
    chat_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: usize,
}

/// Appends `/chat/completions` to a base URL unless already present.
pub(crate) fn chat_completions_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

fn build_http(config: &AiConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .context("Failed to create HTTP client")
}

impl OpenAiClient {
    /// Creates a client for the hosted `OpenAI` API.
    ///
    /// # Errors
    ///
    /// Returns [`RepoMindError::MissingCredential`] without an API key.
    pub fn openai(config: &AiConfig) -> Result<Self> {
        let backend: &BackendConfig = &config.openai;
        let api_key =
            non_empty(backend.api_key.as_ref()).ok_or_else(|| RepoMindError::MissingCredential {
                provider: "openai".to_string(),
                env_var: OPENAI_API_KEY_ENV.to_string(),
            })?;

        Ok(Self {
            name: "openai",
            http: build_http(config)?,
            api_key: Some(SecretString::new(api_key.into())),
            api_key_env: OPENAI_API_KEY_ENV,
            chat_url: chat_completions_url(
                backend.base_url.as_deref().unwrap_or(OPENAI_API_URL),
            ),
            model: non_empty(backend.model.as_ref())
                .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    /// Creates a client for a self-hosted or third-party compatible endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RepoMindError::MissingCredential`] when the base URL or the
    /// model is not configured.
    pub fn compatible(config: &AiConfig) -> Result<Self> {
        let backend = &config.openai_compatible;
        let missing = |env_var: &str| RepoMindError::MissingCredential {
            provider: "openai-compatible".to_string(),
            env_var: env_var.to_string(),
        };
        let base_url =
            non_empty(backend.base_url.as_ref()).ok_or_else(|| missing(OPENAI_COMPATIBLE_BASE_URL_ENV))?;
        let model =
            non_empty(backend.model.as_ref()).ok_or_else(|| missing(OPENAI_COMPATIBLE_MODEL_ENV))?;

        Ok(Self {
            name: "openai-compatible",
            http: build_http(config)?,
            api_key: non_empty(backend.api_key.as_ref()).map(|k| SecretString::new(k.into())),
            api_key_env: OPENAI_COMPATIBLE_API_KEY_ENV,
            chat_url: chat_completions_url(&base_url),
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    /// Full chat-completions URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.chat_url
    }
}

impl ChatCompletionsBackend for OpenAiClient {
    fn provider_name(&self) -> &str {
        self.name
    }

    fn chat_url(&self) -> &str {
        &self.chat_url
    }

    fn api_key_env(&self) -> &str {
        self.api_key_env
    }

    fn http_client(&self) -> &Client {
        &self.http
    }

    fn api_key(&self) -> Option<&SecretString> {
        self.api_key.as_ref()
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    fn temperature(&self) -> f32 {
        self.temperature
    }

    fn max_retries(&self) -> usize {
        self.max_retries
    }
}

#[async_trait]
impl AiProvider for OpenAiClient {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_content(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        self.chat_content(prompt, options).await
    }

    async fn generate_content_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream> {
        self.chat_content_stream(prompt, options).await
    }

    async fn generate_with_functions(
        &self,
        prompt: &str,
        functions: &[FunctionDeclaration],
        options: &GenerateOptions,
    ) -> Result<FunctionCallResult> {
        self.chat_with_functions(prompt, functions, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_url_is_not_duplicated() {
        assert_eq!(
            chat_completions_url("https://api.openai.com/v1"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("http://llm:8080/v1/chat/completions/"),
            "http://llm:8080/v1/chat/completions"
        );
    }

    #[test]
    fn openai_requires_key() {
        let err = OpenAiClient::openai(&AiConfig::default()).unwrap_err();
        match err.downcast_ref::<RepoMindError>() {
            Some(RepoMindError::MissingCredential { env_var, .. }) => {
                assert_eq!(env_var, OPENAI_API_KEY_ENV);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn compatible_requires_base_url_then_model() {
        let mut config = AiConfig::default();
        let err = OpenAiClient::compatible(&config).unwrap_err();
        assert!(err.to_string().contains(OPENAI_COMPATIBLE_BASE_URL_ENV));

        config.openai_compatible.base_url = Some("http://localhost:11434/v1".to_string());
        let err = OpenAiClient::compatible(&config).unwrap_err();
        assert!(err.to_string().contains(OPENAI_COMPATIBLE_MODEL_ENV));

        config.openai_compatible.model = Some("llama3".to_string());
        let client = OpenAiClient::compatible(&config).expect("client");
        assert_eq!(client.url(), "http://localhost:11434/v1/chat/completions");
        assert!(client.api_key().is_none());
        assert_eq!(AiProvider::model(&client), "llama3");
    }

    #[test]
    fn openai_uses_default_model() {
        let mut config = AiConfig::default();
        config.openai.api_key = Some("sk-test".to_string());
        let client = OpenAiClient::openai(&config).expect("client");
        assert_eq!(AiProvider::name(&client), "openai");
        assert_eq!(AiProvider::model(&client), OPENAI_DEFAULT_MODEL);
        assert_eq!(client.url(), "https://api.openai.com/v1/chat/completions");
    }
}
