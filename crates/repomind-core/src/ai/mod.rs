// SPDX-License-Identifier: Apache-2.0

//! AI integration module.
//!
//! One [`AiProvider`] implementation per backend (Gemini, `OpenAI`,
//! OpenAI-compatible, Anthropic, cluster-hosted), selected by
//! [`create_provider`].

pub mod anthropic;
pub mod cluster;
pub mod gemini;
pub mod openai;
pub mod provider;
pub mod registry;
mod sse;
pub mod types;

pub use anthropic::AnthropicClient;
pub use cluster::ClusterAiClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
pub use provider::{AiProvider, ChatCompletionsBackend};
pub use registry::{ProviderKind, create_provider, select_provider_kind};
pub use types::{
    FunctionCall, FunctionCallResult, FunctionDeclaration, GenerateOptions, TextStream,
};

/// Gemini API base URL.
pub const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Environment variable for the Gemini API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Gemini model used when none is configured.
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// `OpenAI` API base URL.
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Environment variable for the `OpenAI` API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// `OpenAI` model used when none is configured.
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Environment variable for an OpenAI-compatible endpoint's key.
pub const OPENAI_COMPATIBLE_API_KEY_ENV: &str = "OPENAI_COMPATIBLE_API_KEY";

/// Environment variable for an OpenAI-compatible endpoint's base URL.
pub const OPENAI_COMPATIBLE_BASE_URL_ENV: &str = "OPENAI_COMPATIBLE_BASE_URL";

/// Environment variable for an OpenAI-compatible endpoint's model.
pub const OPENAI_COMPATIBLE_MODEL_ENV: &str = "OPENAI_COMPATIBLE_MODEL";

/// Anthropic API base URL.
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";

/// Environment variable for the Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Anthropic model used when none is configured.
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Messages API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Environment variable for the cluster inference token.
pub const CLUSTER_AI_API_KEY_ENV: &str = "CLUSTER_AI_API_KEY";
