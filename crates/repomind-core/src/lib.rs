// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! # RepoMind Core
//!
//! Core library for RepoMind - chat with an AI assistant about a GitHub
//! repository or profile.
//!
//! This crate provides reusable components for:
//! - GitHub API integration (profiles, repositories, trees, contents, GraphQL stats)
//! - Pluggable cache providers (Redis standalone/cluster, hosted KV, in-memory)
//! - Fixed-TTL caching helpers and usage analytics
//! - Pluggable AI providers (Gemini, `OpenAI`, OpenAI-compatible, Anthropic, cluster-hosted)
//! - Application state with lazily created, resettable providers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use repomind_core::{AppState, Assistant, Subject, load_config};
//! use anyhow::Result;
//!
//! # async fn example() -> Result<()> {
//! let state = AppState::new(load_config()?);
//! let assistant = Assistant::from_state(&state)?;
//!
//! let subject = Subject::parse("rust-lang/cargo")?;
//! let answer = assistant
//!     .answer(&subject, "How are dependencies resolved?", None)
//!     .await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`ai`] - AI provider abstraction and backends
//! - [`analytics`] - Visitor and query tracking
//! - [`assistant`] - File selection, prompt assembly, answers
//! - [`cache`] - Cache provider abstraction and backends
//! - [`caching`] - Keyed, fixed-TTL helpers for GitHub data
//! - [`config`] - Configuration loading and paths
//! - [`error`] - Error types
//! - [`github`] - GitHub REST and GraphQL access
//! - [`state`] - Application-owned provider instances

// ============================================================================
// Error Handling
// ============================================================================

pub use error::RepoMindError;

/// Convenience Result type for RepoMind operations.
///
/// This is equivalent to `std::result::Result<T, RepoMindError>`.
pub type Result<T> = std::result::Result<T, RepoMindError>;

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    AiConfig, AppConfig, BackendConfig, CacheConfig, ClusterAiConfig, GitHubConfig, config_dir,
    config_file_path, load_config, load_config_from,
};

// ============================================================================
// Cache
// ============================================================================

pub use cache::{CacheKind, CacheProvider, KvCache, MemoryCache, RedisCache, RedisMode, create_cache_provider};

// ============================================================================
// Analytics
// ============================================================================

pub use analytics::{
    AnalyticsSnapshot, EventMetadata, EventType, VisitorRecord, get_analytics_data,
    get_total_queries, track_event,
};

// ============================================================================
// AI Integration
// ============================================================================

pub use ai::{
    AiProvider, FunctionCall, FunctionCallResult, FunctionDeclaration, GenerateOptions,
    ProviderKind, TextStream, create_provider,
};

// ============================================================================
// Assistant and State
// ============================================================================

pub use assistant::{Assistant, Subject, Visitor};
pub use state::{AppState, ProviderCell};

// ============================================================================
// Retry Logic
// ============================================================================

pub use retry::{is_retryable_anyhow, is_retryable_http, retry_backoff};

// ============================================================================
// Modules
// ============================================================================

pub mod ai;
pub mod analytics;
pub mod assistant;
pub mod cache;
pub mod caching;
pub mod config;
pub mod error;
pub mod github;
pub mod retry;
pub mod state;
pub mod utils;
