// SPDX-License-Identifier: Apache-2.0

//! Centralized provider registry and factory.
//!
//! Holds static metadata for every supported backend and selects one from
//! configuration. Selection priority:
//!
//! 1. `CLUSTER_AI_ENABLED=true` forces the cluster backend
//! 2. `AI_PROVIDER` names a backend
//! 3. Gemini is the default
//!
//! An unknown `AI_PROVIDER` value falls back to the default with a warning.
//!
//! # Examples
//!
//! ```
//! use repomind_core::ai::registry::{all_providers, get_provider};
//!
//! let provider = get_provider("anthropic");
//! assert!(provider.is_some());
//! assert_eq!(all_providers().len(), 5);
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use super::anthropic::AnthropicClient;
use super::cluster::ClusterAiClient;
use super::gemini::GeminiClient;
use super::openai::OpenAiClient;
use super::provider::AiProvider;
use super::{
    ANTHROPIC_API_KEY_ENV, ANTHROPIC_API_URL, ANTHROPIC_DEFAULT_MODEL, CLUSTER_AI_API_KEY_ENV,
    GEMINI_API_KEY_ENV, GEMINI_API_URL, GEMINI_DEFAULT_MODEL, OPENAI_API_KEY_ENV, OPENAI_API_URL,
    OPENAI_COMPATIBLE_API_KEY_ENV, OPENAI_DEFAULT_MODEL,
};
use crate::config::AiConfig;

/// Static metadata for an AI provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Provider identifier (lowercase, as used in `AI_PROVIDER`)
    pub name: &'static str,

    /// Human-readable provider name
    pub display_name: &'static str,

    /// Default API base URL; empty when it comes from configuration
    pub api_url: &'static str,

    /// Environment variable name for the API key
    pub api_key_env: &'static str,

    /// Model used when none is configured; empty when one must be supplied
    pub default_model: &'static str,
}

/// Static registry of all supported AI providers
pub static PROVIDERS: &[ProviderConfig] = &[
    ProviderConfig {
        name: "gemini",
        display_name: "Google Gemini",
        api_url: GEMINI_API_URL,
        api_key_env: GEMINI_API_KEY_ENV,
        default_model: GEMINI_DEFAULT_MODEL,
    },
    ProviderConfig {
        name: "openai",
        display_name: "OpenAI",
        api_url: OPENAI_API_URL,
        api_key_env: OPENAI_API_KEY_ENV,
        default_model: OPENAI_DEFAULT_MODEL,
    },
    ProviderConfig {
        name: "openai-compatible",
        display_name: "OpenAI-compatible endpoint",
        api_url: "",
        api_key_env: OPENAI_COMPATIBLE_API_KEY_ENV,
        default_model: "",
    },
    ProviderConfig {
        name: "anthropic",
        display_name: "Anthropic Claude",
        api_url: ANTHROPIC_API_URL,
        api_key_env: ANTHROPIC_API_KEY_ENV,
        default_model: ANTHROPIC_DEFAULT_MODEL,
    },
    ProviderConfig {
        name: "cluster-ai",
        display_name: "Cluster-hosted model",
        api_url: "",
        api_key_env: CLUSTER_AI_API_KEY_ENV,
        default_model: "qwen2.5-coder-7b-instruct",
    },
];

/// Retrieves a provider configuration by name.
///
/// Accepts the same aliases as [`ProviderKind`].
#[must_use]
pub fn get_provider(name: &str) -> Option<&'static ProviderConfig> {
    let kind = name.parse::<ProviderKind>().ok()?;
    PROVIDERS.iter().find(|p| p.name == kind.as_str())
}

/// Returns all registered providers.
#[must_use]
pub fn all_providers() -> &'static [ProviderConfig] {
    PROVIDERS
}

/// Backend implementation selected by the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Google Gemini.
    Gemini,
    /// Hosted `OpenAI`.
    OpenAi,
    /// Any OpenAI-compatible endpoint.
    OpenAiCompatible,
    /// Anthropic Claude.
    Anthropic,
    /// Cluster-hosted model (`cluster-ai`, also accepted as `cluster-mcp`).
    Cluster,
}

impl ProviderKind {
    /// Canonical name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::OpenAiCompatible => "openai-compatible",
            Self::Anthropic => "anthropic",
            Self::Cluster => "cluster-ai",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized provider name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown AI provider '{0}'")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "openai-compatible" | "openai_compatible" => Ok(Self::OpenAiCompatible),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "cluster-ai" | "cluster-mcp" | "cluster" => Ok(Self::Cluster),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// Decides which backend configuration selects.
#[must_use]
pub fn select_provider_kind(config: &AiConfig) -> ProviderKind {
    if config.cluster.enabled {
        return ProviderKind::Cluster;
    }

    match config.provider.as_deref().map(str::trim) {
        None | Some("") => ProviderKind::Gemini,
        Some(name) => name.parse().unwrap_or_else(|e: UnknownProvider| {
            warn!(error = %e, "Falling back to gemini");
            ProviderKind::Gemini
        }),
    }
}

/// Builds the provider for a specific kind.
///
/// # Errors
///
/// Fails fast when the backend's required credentials are missing.
pub fn create_provider_of(kind: ProviderKind, config: &AiConfig) -> Result<Arc<dyn AiProvider>> {
    let provider: Arc<dyn AiProvider> = match kind {
        ProviderKind::Gemini => Arc::new(GeminiClient::new(config)?),
        ProviderKind::OpenAi => Arc::new(OpenAiClient::openai(config)?),
        ProviderKind::OpenAiCompatible => Arc::new(OpenAiClient::compatible(config)?),
        ProviderKind::Anthropic => Arc::new(AnthropicClient::new(config)?),
        ProviderKind::Cluster => Arc::new(ClusterAiClient::new(config)?),
    };
    info!(provider = %kind, model = provider.model(), "Created AI provider");
    Ok(provider)
}

/// Builds the provider configuration selects.
///
/// # Errors
///
/// Fails fast when the selected backend's credentials are missing.
pub fn create_provider(config: &AiConfig) -> Result<Arc<dyn AiProvider>> {
    create_provider_of(select_provider_kind(config), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepoMindError;

    #[test]
    fn test_get_provider_aliases() {
        assert_eq!(get_provider("cluster-mcp").map(|p| p.name), Some("cluster-ai"));
        assert_eq!(get_provider("Gemini").map(|p| p.name), Some("gemini"));
        assert!(get_provider("openrouter").is_none());
    }

    #[test]
    fn test_provider_names_round_trip() {
        for provider in all_providers() {
            let kind: ProviderKind = provider.name.parse().expect("registered name parses");
            assert_eq!(kind.as_str(), provider.name);
        }
    }

    #[test]
    fn test_cluster_flag_beats_named_provider() {
        let mut config = AiConfig::default();
        config.provider = Some("anthropic".to_string());
        assert_eq!(select_provider_kind(&config), ProviderKind::Anthropic);

        config.cluster.enabled = true;
        assert_eq!(select_provider_kind(&config), ProviderKind::Cluster);
    }

    #[test]
    fn test_unknown_provider_falls_back_to_default() {
        let mut config = AiConfig::default();
        config.provider = Some("mystery".to_string());
        assert_eq!(select_provider_kind(&config), ProviderKind::Gemini);

        config.provider = None;
        assert_eq!(select_provider_kind(&config), ProviderKind::Gemini);
    }

    #[test]
    fn test_missing_credentials_fail_at_construction() {
        let mut config = AiConfig::default();
        config.provider = Some("openai".to_string());
        let err = create_provider(&config).err().expect("should fail");
        assert!(matches!(
            err.downcast_ref::<RepoMindError>(),
            Some(RepoMindError::MissingCredential { provider, .. }) if provider == "openai"
        ));
    }

    #[test]
    fn test_cluster_needs_no_credentials() {
        let mut config = AiConfig::default();
        config.provider = Some("cluster-mcp".to_string());
        let provider = create_provider(&config).expect("cluster provider");
        assert_eq!(provider.name(), "cluster-ai");
        assert_eq!(provider.model(), "qwen2.5-coder-7b-instruct");
    }
}
