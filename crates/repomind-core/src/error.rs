// SPDX-License-Identifier: Apache-2.0

//! Error types for RepoMind.
//!
//! Uses `thiserror` for deriving `std::error::Error` implementations.
//! AI and GitHub functions return `anyhow::Result` carrying these variants so
//! callers can `downcast_ref::<RepoMindError>()` to classify failures.

use thiserror::Error;

/// Errors that can occur during RepoMind operations.
#[derive(Error, Debug)]
pub enum RepoMindError {
    /// GitHub API error from octocrab.
    #[error("GitHub API error: {message}")]
    GitHub {
        /// Error message.
        message: String,
    },

    /// A requested repository, path, or profile does not exist.
    #[error("Not found: {resource}")]
    NotFound {
        /// Human-readable identifier of the missing resource.
        resource: String,
    },

    /// AI provider error (Gemini, `OpenAI`, Anthropic, cluster).
    #[error("AI provider error: {message}")]
    AI {
        /// Error message from the AI provider.
        message: String,
        /// Optional HTTP status code from the provider.
        status: Option<u16>,
        /// Name of the AI provider.
        provider: String,
    },

    /// The configured model does not exist on the backend.
    #[error(
        "Model '{model}' not found on {provider}. Check that the model is deployed and the model name is correct."
    )]
    ModelNotFound {
        /// Name of the AI provider.
        provider: String,
        /// Model that was requested.
        model: String,
    },

    /// The AI backend is unreachable or refusing requests.
    #[error("{provider} is unavailable: {message}. The service may be starting up or scaled down.")]
    ServiceUnavailable {
        /// Name of the AI provider.
        provider: String,
        /// Underlying failure description.
        message: String,
    },

    /// The AI backend did not answer within the allotted time.
    #[error("{provider} did not respond within {seconds}s. Try a shorter question or retry later.")]
    Timeout {
        /// Name of the AI provider.
        provider: String,
        /// Deadline that was exceeded, in seconds.
        seconds: u64,
    },

    /// Rate limit exceeded from an AI provider.
    #[error("Rate limit exceeded on {provider}, retry after {retry_after}s")]
    RateLimited {
        /// Name of the provider that rate limited.
        provider: String,
        /// Number of seconds to wait before retrying.
        retry_after: u64,
    },

    /// A required credential is not configured.
    #[error("Missing {env_var} for {provider}. Set it with: export {env_var}=<value>")]
    MissingCredential {
        /// Name of the provider that needs the credential.
        provider: String,
        /// Environment variable holding the credential.
        env_var: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Invalid JSON response from an AI provider.
    #[error("Invalid JSON response from AI")]
    InvalidAIResponse(#[source] serde_json::Error),

    /// Network/HTTP error from reqwest.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl From<octocrab::Error> for RepoMindError {
    fn from(err: octocrab::Error) -> Self {
        RepoMindError::GitHub {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for RepoMindError {
    fn from(err: config::ConfigError) -> Self {
        RepoMindError::Config {
            message: err.to_string(),
        }
    }
}
