// SPDX-License-Identifier: Apache-2.0

//! Cluster-hosted model backend.
//!
//! Speaks the chat-completions protocol against an inference service that
//! may run inside the same Kubernetes cluster. The endpoint is resolved in
//! priority order:
//!
//! 1. `CLUSTER_AI_ENDPOINT` when set
//! 2. In-cluster service DNS when `KUBERNETES_SERVICE_HOST` is present
//! 3. The public ingress URL
//!
//! Every call runs under an explicit deadline, and failures are reclassified
//! into [`RepoMindError::ModelNotFound`], [`RepoMindError::ServiceUnavailable`]
//! and [`RepoMindError::Timeout`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, instrument, warn};

use super::provider::{AiProvider, ChatCompletionsBackend};
use super::types::{FunctionCallResult, FunctionDeclaration, GenerateOptions, TextStream};
use super::CLUSTER_AI_API_KEY_ENV;
use crate::config::{AiConfig, ClusterAiConfig};
use crate::error::RepoMindError;

/// Provider name reported in logs and errors.
pub const CLUSTER_PROVIDER_NAME: &str = "cluster-ai";

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves the inference base URL.
#[must_use]
pub fn resolve_cluster_base_url(config: &ClusterAiConfig) -> String {
    if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
        return endpoint.trim_end_matches('/').to_string();
    }

    if config.in_cluster {
        let path = config.path.trim_end_matches('/');
        let path = if path.is_empty() || path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        return format!(
            "http://{}.{}.svc.cluster.local:{}{path}",
            config.service, config.namespace, config.port
        );
    }

    config.public_url.trim_end_matches('/').to_string()
}

/// Chat-completions URL for a base, without duplicating path segments.
#[must_use]
pub fn chat_completions_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

/// Health URL: the base with `/chat/completions` and `/v1` stripped, plus `/health`.
#[must_use]
pub fn health_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let base = base.strip_suffix("/chat/completions").unwrap_or(base);
    let base = base.strip_suffix("/v1").unwrap_or(base);
    format!("{base}/health")
}

/// Reclassifies a cluster failure into a user-facing error.
///
/// Unrecognized errors are returned unchanged.
#[must_use]
pub fn classify_cluster_error(err: anyhow::Error, model: &str, deadline_secs: u64) -> anyhow::Error {
    let message = format!("{err:#}").to_lowercase();
    let typed = err.downcast_ref::<RepoMindError>();

    let status = match typed {
        Some(RepoMindError::AI { status, .. }) => *status,
        Some(RepoMindError::Network(e)) => e.status().map(|s| s.as_u16()),
        _ => None,
    };
    let (connect_failed, timed_out) = match typed {
        Some(RepoMindError::Network(e)) => (e.is_connect(), e.is_timeout()),
        Some(RepoMindError::Timeout { .. }) => (false, true),
        _ => (false, false),
    };

    if status == Some(404)
        || (message.contains("model")
            && (message.contains("not found") || message.contains("does not exist")))
    {
        return RepoMindError::ModelNotFound {
            provider: CLUSTER_PROVIDER_NAME.to_string(),
            model: model.to_string(),
        }
        .into();
    }

    // A connect timeout is both a connect and a timeout error; report the timeout.
    if timed_out || message.contains("timed out") || message.contains("aborted") {
        return RepoMindError::Timeout {
            provider: CLUSTER_PROVIDER_NAME.to_string(),
            seconds: deadline_secs,
        }
        .into();
    }

    if status == Some(503)
        || connect_failed
        || message.contains("connection refused")
        || message.contains("econnrefused")
        || message.contains("service unavailable")
    {
        return RepoMindError::ServiceUnavailable {
            provider: CLUSTER_PROVIDER_NAME.to_string(),
            message: format!("{err}"),
        }
        .into();
    }

    err
}

/// Client for the cluster inference service.
pub struct ClusterAiClient {
    http: Client,
    api_key: Option<SecretString>,
    base_url: String,
    chat_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: usize,
    request_timeout: Duration,
    stream_timeout: Duration,
}

impl ClusterAiClient {
    /// Creates a client, resolving the endpoint from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &AiConfig) -> Result<Self> {
        let cluster = &config.cluster;
        let base_url = resolve_cluster_base_url(cluster);
        let chat_url = chat_completions_url(&base_url);

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        info!(
            base_url = %base_url,
            model = %cluster.model,
            in_cluster = cluster.in_cluster,
            "Configured cluster AI backend"
        );

        Ok(Self {
            http,
            api_key: cluster
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .map(|k| SecretString::new(k.into())),
            base_url,
            chat_url,
            model: cluster.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
            request_timeout: Duration::from_secs(cluster.request_timeout_seconds),
            stream_timeout: Duration::from_secs(cluster.stream_timeout_seconds),
        })
    }

    /// Resolved base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn model_for<'a>(&'a self, options: &'a GenerateOptions) -> &'a str {
        options.model.as_deref().unwrap_or(&self.model)
    }

    /// Runs a single-shot call under the request deadline and classifies failures.
    async fn bounded<T>(
        &self,
        options: &GenerateOptions,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let seconds = self.request_timeout.as_secs();
        let outcome = match timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(seconds, "Cluster AI request exceeded deadline");
                Err(RepoMindError::Timeout {
                    provider: CLUSTER_PROVIDER_NAME.to_string(),
                    seconds,
                }
                .into())
            }
        };
        outcome.map_err(|e| classify_cluster_error(e, self.model_for(options), seconds))
    }
}

impl ChatCompletionsBackend for ClusterAiClient {
    fn provider_name(&self) -> &str {
        CLUSTER_PROVIDER_NAME
    }

    fn chat_url(&self) -> &str {
        &self.chat_url
    }

    fn api_key_env(&self) -> &str {
        CLUSTER_AI_API_KEY_ENV
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

struct Bounded {
    inner: Option<TextStream>,
    deadline: Instant,
    seconds: u64,
    model: String,
}

#[async_trait]
impl AiProvider for ClusterAiClient {
    fn name(&self) -> &str {
        CLUSTER_PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model_for(options)))]
    async fn generate_content(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        self.bounded(options, self.chat_content(prompt, options)).await
    }

    /// The stream ends with [`RepoMindError::Timeout`] once the stream
    /// deadline passes, whether or not the caller is still consuming.
    async fn generate_content_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream> {
        let seconds = self.stream_timeout.as_secs();
        let deadline = Instant::now() + self.stream_timeout;
        let model = self.model_for(options).to_string();

        let inner = match timeout_at(deadline, self.chat_content_stream(prompt, options)).await {
            Ok(Ok(inner)) => inner,
            Ok(Err(e)) => return Err(classify_cluster_error(e, &model, seconds)),
            Err(_) => {
                return Err(RepoMindError::Timeout {
                    provider: CLUSTER_PROVIDER_NAME.to_string(),
                    seconds,
                }
                .into());
            }
        };

        let state = Bounded {
            inner: Some(inner),
            deadline,
            seconds,
            model,
        };

        let chunks = stream::unfold(state, |mut state| async move {
            let inner = state.inner.as_mut()?;
            let next = timeout_at(state.deadline, inner.next()).await;
            match next {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), state)),
                Ok(Some(Err(e))) => {
                    state.inner = None;
                    let err = classify_cluster_error(e, &state.model, state.seconds);
                    Some((Err(err), state))
                }
                Ok(None) => None,
                Err(_) => {
                    warn!(seconds = state.seconds, "Cluster AI stream exceeded deadline");
                    state.inner = None;
                    let err = RepoMindError::Timeout {
                        provider: CLUSTER_PROVIDER_NAME.to_string(),
                        seconds: state.seconds,
                    };
                    Some((Err(err.into()), state))
                }
            }
        });
        Ok(Box::pin(chunks))
    }

    async fn generate_with_functions(
        &self,
        prompt: &str,
        functions: &[FunctionDeclaration],
        options: &GenerateOptions,
    ) -> Result<FunctionCallResult> {
        self.bounded(options, self.chat_with_functions(prompt, functions, options))
            .await
    }

    async fn health_check(&self) -> bool {
        let url = health_url(&self.base_url);
        let mut request = self.http.get(&url).timeout(HEALTH_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        match request.send().await {
            Ok(response) => {
                debug!(status = %response.status(), url = %url, "Cluster health check");
                response.status().is_success()
            }
            Err(e) => {
                warn!(error = %e, url = %url, "Cluster health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> ClusterAiConfig {
        ClusterAiConfig::default()
    }

    #[test]
    fn explicit_endpoint_wins() {
        let config = ClusterAiConfig {
            endpoint: Some("http://gpu-box:9000/v1/".to_string()),
            in_cluster: true,
            ..cluster()
        };
        assert_eq!(resolve_cluster_base_url(&config), "http://gpu-box:9000/v1");
    }

    #[test]
    fn in_cluster_builds_service_dns() {
        let config = ClusterAiConfig {
            in_cluster: true,
            path: "v1".to_string(),
            ..cluster()
        };
        assert_eq!(
            resolve_cluster_base_url(&config),
            "http://ai-inference.ai.svc.cluster.local:8000/v1"
        );
    }

    #[test]
    fn public_url_is_the_fallback() {
        assert_eq!(resolve_cluster_base_url(&cluster()), "http://localhost:8000/v1");
    }

    #[test]
    fn chat_url_avoids_duplicate_segments() {
        assert_eq!(
            chat_completions_url("http://h/v1"),
            "http://h/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("http://h/v1/chat/completions"),
            "http://h/v1/chat/completions"
        );
        assert_eq!(chat_completions_url("http://h:8000/"), "http://h:8000/v1/chat/completions");
    }

    #[test]
    fn health_url_strips_suffixes() {
        assert_eq!(health_url("http://h:8000/v1/chat/completions"), "http://h:8000/health");
        assert_eq!(health_url("http://h:8000/v1"), "http://h:8000/health");
        assert_eq!(health_url("http://h:8000"), "http://h:8000/health");
    }

    fn ai_error(status: u16, message: &str) -> anyhow::Error {
        RepoMindError::AI {
            message: message.to_string(),
            status: Some(status),
            provider: CLUSTER_PROVIDER_NAME.to_string(),
        }
        .into()
    }

    #[test]
    fn classifies_model_not_found() {
        let err = classify_cluster_error(ai_error(404, "nope"), "qwen", 60);
        assert!(matches!(
            err.downcast_ref::<RepoMindError>(),
            Some(RepoMindError::ModelNotFound { model, .. }) if model == "qwen"
        ));

        let err = classify_cluster_error(ai_error(400, "The model `x` does not exist"), "x", 60);
        assert!(matches!(
            err.downcast_ref::<RepoMindError>(),
            Some(RepoMindError::ModelNotFound { .. })
        ));
    }

    #[test]
    fn classifies_unavailable_and_timeout() {
        let err = classify_cluster_error(ai_error(503, "loading"), "m", 60);
        assert!(matches!(
            err.downcast_ref::<RepoMindError>(),
            Some(RepoMindError::ServiceUnavailable { .. })
        ));

        let err = classify_cluster_error(anyhow::anyhow!("connect ECONNREFUSED 10.0.0.1:8000"), "m", 60);
        assert!(matches!(
            err.downcast_ref::<RepoMindError>(),
            Some(RepoMindError::ServiceUnavailable { .. })
        ));

        let err = classify_cluster_error(anyhow::anyhow!("request aborted"), "m", 120);
        assert!(matches!(
            err.downcast_ref::<RepoMindError>(),
            Some(RepoMindError::Timeout { seconds: 120, .. })
        ));
    }

    #[test]
    fn timeout_wins_over_connection_failure() {
        let err = anyhow::Error::from(RepoMindError::Timeout {
            provider: CLUSTER_PROVIDER_NAME.to_string(),
            seconds: 5,
        })
        .context("connection refused while connecting");
        let err = classify_cluster_error(err, "qwen", 60);
        assert!(matches!(
            err.downcast_ref::<RepoMindError>(),
            Some(RepoMindError::Timeout { seconds: 60, .. })
        ));
    }

    #[test]
    fn other_errors_pass_through() {
        let err = classify_cluster_error(ai_error(400, "bad request"), "m", 60);
        assert!(matches!(
            err.downcast_ref::<RepoMindError>(),
            Some(RepoMindError::AI { status: Some(400), .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        let mut config = AiConfig::default();
        config.max_retries = 0;
        config.cluster.endpoint = Some("http://127.0.0.1:1/v1".to_string());
        let client = ClusterAiClient::new(&config).expect("client");

        let err = client
            .generate_content("hi", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RepoMindError>(),
            Some(RepoMindError::ServiceUnavailable { .. })
        ));
        assert!(!client.health_check().await);
    }
}
