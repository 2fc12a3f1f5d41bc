// SPDX-License-Identifier: Apache-2.0

//! Configuration management for RepoMind.
//!
//! Provides layered configuration from files and environment variables.
//! Uses XDG-compliant paths with environment variable support.
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Well-known deployment variables (`AI_PROVIDER`, `REDIS_URL`, `CLUSTER_AI_*`, ...)
//! 2. Prefixed environment variables (prefix: `REPOMIND_`)
//! 3. Config file: `~/.config/repomind/config.toml`
//! 4. Built-in defaults
//!
//! # Examples
//!
//! ```bash
//! # Override the AI provider via the deployment variable
//! AI_PROVIDER=anthropic repomind-server
//!
//! # Or via the prefixed form
//! REPOMIND_AI__TEMPERATURE=0.2 repomind-server
//! ```

use std::fmt;
use std::path::PathBuf;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::RepoMindError;

/// Environment variable whose presence marks a process running inside Kubernetes.
pub const IN_CLUSTER_MARKER_ENV: &str = "KUBERNETES_SERVICE_HOST";

/// Deployment environment variables and the config keys they override.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("CACHE_PROVIDER", "cache.provider"),
    ("REDIS_URL", "cache.redis_url"),
    ("KV_REST_API_URL", "cache.kv_rest_api_url"),
    ("KV_REST_API_TOKEN", "cache.kv_rest_api_token"),
    ("AI_PROVIDER", "ai.provider"),
    ("GEMINI_API_KEY", "ai.gemini.api_key"),
    ("GEMINI_MODEL", "ai.gemini.model"),
    ("OPENAI_API_KEY", "ai.openai.api_key"),
    ("OPENAI_MODEL", "ai.openai.model"),
    ("OPENAI_BASE_URL", "ai.openai.base_url"),
    ("OPENAI_COMPATIBLE_API_KEY", "ai.openai_compatible.api_key"),
    ("OPENAI_COMPATIBLE_MODEL", "ai.openai_compatible.model"),
    ("OPENAI_COMPATIBLE_BASE_URL", "ai.openai_compatible.base_url"),
    ("ANTHROPIC_API_KEY", "ai.anthropic.api_key"),
    ("ANTHROPIC_MODEL", "ai.anthropic.model"),
    ("CLUSTER_AI_ENABLED", "ai.cluster.enabled"),
    ("CLUSTER_AI_ENDPOINT", "ai.cluster.endpoint"),
    ("CLUSTER_AI_PATH", "ai.cluster.path"),
    ("CLUSTER_AI_SERVICE", "ai.cluster.service"),
    ("CLUSTER_AI_NAMESPACE", "ai.cluster.namespace"),
    ("CLUSTER_AI_PORT", "ai.cluster.port"),
    ("CLUSTER_AI_MODEL", "ai.cluster.model"),
    ("CLUSTER_AI_PUBLIC_URL", "ai.cluster.public_url"),
    ("CLUSTER_AI_API_KEY", "ai.cluster.api_key"),
    ("GITHUB_TOKEN", "github.token"),
    ("GITHUB_API_URL", "github.api_base_url"),
];

/// Application configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// AI provider settings.
    pub ai: AiConfig,
    /// Cache backend settings.
    pub cache: CacheConfig,
    /// GitHub API settings.
    pub github: GitHubConfig,
}

/// AI provider settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Named provider: gemini, openai, openai-compatible, anthropic, cluster-ai, cluster-mcp.
    pub provider: Option<String>,
    /// Default sampling temperature.
    pub temperature: f32,
    /// Default maximum output tokens.
    pub max_tokens: u32,
    /// HTTP request timeout in seconds.
    pub timeout_seconds: u64,
    /// Retries for transient failures (0 disables retrying).
    pub max_retries: usize,
    /// Google Gemini settings.
    pub gemini: BackendConfig,
    /// `OpenAI` settings.
    pub openai: BackendConfig,
    /// Generic OpenAI-compatible endpoint settings.
    pub openai_compatible: BackendConfig,
    /// Anthropic settings.
    pub anthropic: BackendConfig,
    /// Cluster-hosted model settings.
    pub cluster: ClusterAiConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: None,
            temperature: 0.7,
            max_tokens: 8192,
            timeout_seconds: 120,
            max_retries: 3,
            gemini: BackendConfig::default(),
            openai: BackendConfig::default(),
            openai_compatible: BackendConfig::default(),
            anthropic: BackendConfig::default(),
            cluster: ClusterAiConfig::default(),
        }
    }
}

/// Credentials and model for a hosted AI backend.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// API key (falls back to nothing; providers fail fast when required).
    pub api_key: Option<String>,
    /// Model identifier override.
    pub model: Option<String>,
    /// Base URL override (e.g. `https://api.example.com/v1`).
    pub base_url: Option<String>,
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Cluster-hosted model settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClusterAiConfig {
    /// Force the cluster backend regardless of `provider`.
    pub enabled: bool,
    /// Explicit endpoint override (highest priority).
    pub endpoint: Option<String>,
    /// API path appended to in-cluster service URLs.
    pub path: String,
    /// Kubernetes service name.
    pub service: String,
    /// Kubernetes namespace.
    pub namespace: String,
    /// Service port.
    pub port: u16,
    /// Model served by the cluster.
    pub model: String,
    /// Public ingress URL used outside the cluster.
    pub public_url: String,
    /// Optional bearer token for the inference service.
    pub api_key: Option<String>,
    /// Whether the process runs inside the cluster (set from `KUBERNETES_SERVICE_HOST`).
    pub in_cluster: bool,
    /// Deadline for single-shot calls, in seconds.
    pub request_timeout_seconds: u64,
    /// Hard deadline for streaming calls, in seconds.
    pub stream_timeout_seconds: u64,
}

impl Default for ClusterAiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            path: "/v1".to_string(),
            service: "ai-inference".to_string(),
            namespace: "ai".to_string(),
            port: 8000,
            model: "qwen2.5-coder-7b-instruct".to_string(),
            public_url: "http://localhost:8000/v1".to_string(),
            api_key: None,
            in_cluster: false,
            request_timeout_seconds: 60,
            stream_timeout_seconds: 120,
        }
    }
}

impl fmt::Debug for ClusterAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterAiConfig")
            .field("enabled", &self.enabled)
            .field("endpoint", &self.endpoint)
            .field("path", &self.path)
            .field("service", &self.service)
            .field("namespace", &self.namespace)
            .field("port", &self.port)
            .field("model", &self.model)
            .field("public_url", &self.public_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("in_cluster", &self.in_cluster)
            .finish_non_exhaustive()
    }
}

/// Cache backend settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Explicit provider: redis, vercel-kv, memory.
    pub provider: Option<String>,
    /// Redis connection string (`?cluster=true` or comma-separated hosts for cluster mode).
    pub redis_url: Option<String>,
    /// Hosted key-value REST endpoint.
    pub kv_rest_api_url: Option<String>,
    /// Hosted key-value REST token.
    pub kv_rest_api_token: Option<String>,
    /// Per-operation timeout in milliseconds; slower calls degrade to a miss.
    pub operation_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            provider: None,
            redis_url: None,
            kv_rest_api_url: None,
            kv_rest_api_token: None,
            operation_timeout_ms: 3000,
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("provider", &self.provider)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("kv_rest_api_url", &self.kv_rest_api_url)
            .field(
                "kv_rest_api_token",
                &self.kv_rest_api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("operation_timeout_ms", &self.operation_timeout_ms)
            .finish()
    }
}

/// GitHub API settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Personal access token; unauthenticated requests are used when absent.
    pub token: Option<String>,
    /// REST/GraphQL base URL override (GitHub Enterprise).
    pub api_base_url: Option<String>,
    /// API request timeout in seconds.
    pub api_timeout_seconds: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base_url: None,
            api_timeout_seconds: 10,
        }
    }
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("api_base_url", &self.api_base_url)
            .field("api_timeout_seconds", &self.api_timeout_seconds)
            .finish()
    }
}

/// Returns the RepoMind configuration directory.
///
/// Respects the `XDG_CONFIG_HOME` environment variable if set,
/// otherwise defaults to `~/.config/repomind`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME")
        && !xdg_config.is_empty()
    {
        return PathBuf::from(xdg_config).join("repomind");
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".config")
        .join("repomind")
}

/// Returns the path to the configuration file.
#[must_use]
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Reads a non-empty environment variable.
fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Applies the well-known deployment variables on top of the other sources.
fn apply_env_overrides(
    mut builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    for (env_var, key) in ENV_OVERRIDES {
        builder = builder.set_override_option(*key, non_empty_env(env_var))?;
    }
    let in_cluster = non_empty_env(IN_CLUSTER_MARKER_ENV).map(|_| true);
    builder.set_override_option("ai.cluster.in_cluster", in_cluster)
}

/// Load application configuration from the default config file location.
///
/// # Errors
///
/// Returns `RepoMindError::Config` if the config file exists but is invalid.
pub fn load_config() -> Result<AppConfig, RepoMindError> {
    load_config_from(&config_file_path())
}

/// Load application configuration from an explicit file path.
///
/// The file is optional; environment variables are always applied.
///
/// # Errors
///
/// Returns `RepoMindError::Config` if the file exists but is invalid or a
/// value cannot be converted to its field type.
pub fn load_config_from(path: &std::path::Path) -> Result<AppConfig, RepoMindError> {
    let builder = Config::builder()
        // Load from config file (optional - may not exist)
        .add_source(File::with_name(path.to_string_lossy().as_ref()).required(false))
        // Override with prefixed environment variables
        .add_source(
            Environment::with_prefix("REPOMIND")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = apply_env_overrides(builder)?.build()?;
    let app_config: AppConfig = config.try_deserialize()?;

    Ok(app_config)
}
