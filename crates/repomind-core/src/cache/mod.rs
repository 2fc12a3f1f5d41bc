// SPDX-License-Identifier: Apache-2.0

//! Cache provider abstraction.
//!
//! A uniform key/value, set, hash and pipeline interface implemented against
//! Redis (standalone or cluster), a hosted key-value REST service, and an
//! in-process store. Every method is infallible by signature: a backend that
//! is slow or unreachable degrades to `None`, `false`, `0` or an empty
//! collection, so callers never handle cache errors.
//!
//! Values are stored as JSON text. Hash fields holding strings are stored
//! verbatim so that numeric counters stay readable by `HINCRBY`.

pub mod kv;
pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;

pub use kv::KvCache;
pub use memory::MemoryCache;
pub use self::redis::{RedisCache, RedisMode};

/// A single queued cache operation.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheCommand {
    /// Read a value.
    Get {
        /// Key to read.
        key: String,
    },
    /// Write a value with an optional TTL in seconds.
    Set {
        /// Key to write.
        key: String,
        /// JSON value.
        value: Value,
        /// Optional TTL in seconds.
        ttl: Option<u64>,
    },
    /// Delete a key.
    Del {
        /// Key to delete.
        key: String,
    },
    /// Add members to a set.
    SAdd {
        /// Set key.
        key: String,
        /// Members to add.
        members: Vec<String>,
    },
    /// Write hash fields.
    HSet {
        /// Hash key.
        key: String,
        /// Field/value pairs, applied in order.
        fields: Vec<(String, Value)>,
    },
    /// Read a whole hash.
    HGetAll {
        /// Hash key.
        key: String,
    },
    /// Increment a hash field.
    HIncrBy {
        /// Hash key.
        key: String,
        /// Field to increment.
        field: String,
        /// Increment amount.
        by: i64,
    },
    /// Increment a counter.
    Incr {
        /// Counter key.
        key: String,
    },
}

/// Cache backend contract.
///
/// Implementations catch their own failures; see the module docs for the
/// degraded value each method returns.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Reads a JSON value.
    async fn get_json(&self, key: &str) -> Option<Value>;

    /// Writes a JSON value with an optional TTL.
    async fn set_json(&self, key: &str, value: &Value, ttl: Option<Duration>) -> bool;

    /// Deletes a key.
    async fn del(&self, key: &str) -> bool;

    /// Checks whether a key exists.
    async fn exists(&self, key: &str) -> bool;

    /// Checks backend connectivity.
    async fn ping(&self) -> bool;

    /// Adds members to a set, returning how many were new.
    async fn sadd(&self, key: &str, members: &[String]) -> u64;

    /// Lists set members.
    async fn smembers(&self, key: &str) -> Vec<String>;

    /// Counts set members.
    async fn scard(&self, key: &str) -> u64;

    /// Writes hash fields, returning how many were new.
    async fn hset(&self, key: &str, fields: &[(String, Value)]) -> u64;

    /// Reads all hash fields.
    async fn hgetall(&self, key: &str) -> HashMap<String, Value>;

    /// Increments a hash field.
    async fn hincrby(&self, key: &str, field: &str, by: i64) -> i64;

    /// Increments a counter.
    async fn incr(&self, key: &str) -> i64;

    /// Lists keys matching a glob pattern (best-effort).
    async fn keys(&self, pattern: &str) -> Vec<String>;

    /// Executes queued commands in one round trip.
    ///
    /// Returns one result per command in submission order, or an empty list
    /// if the batch could not be applied.
    async fn exec_pipeline(&self, commands: Vec<CacheCommand>) -> Vec<Value>;
}

impl dyn CacheProvider + '_ {
    /// Reads and deserializes a value. Undecodable payloads count as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_json(key).await?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!(key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    /// Serializes and writes a value with an optional TTL.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match serde_json::to_value(value) {
            Ok(json) => self.set_json(key, &json, ttl).await,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize cache value");
                false
            }
        }
    }

    /// Writes a value that expires after `ttl_seconds`.
    pub async fn setex<T: Serialize + ?Sized>(&self, key: &str, ttl_seconds: u64, value: &T) -> bool {
        self.set(key, value, Some(Duration::from_secs(ttl_seconds)))
            .await
    }

    /// Writes a single hash field.
    pub async fn hset_field(&self, key: &str, field: &str, value: impl Into<Value>) -> u64 {
        self.hset(key, &[(field.to_string(), value.into())]).await
    }

    /// Starts a pipelined batch against this provider.
    #[must_use]
    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(self)
    }
}

/// Batch builder queuing commands for one round trip.
///
/// Mutation methods only record the command; nothing is sent until
/// [`Pipeline::exec`].
pub struct Pipeline<'a> {
    provider: &'a dyn CacheProvider,
    commands: Vec<CacheCommand>,
}

impl<'a> Pipeline<'a> {
    /// Creates an empty pipeline bound to `provider`.
    #[must_use]
    pub fn new(provider: &'a dyn CacheProvider) -> Self {
        Self {
            provider,
            commands: Vec::new(),
        }
    }

    /// Queues a read.
    pub fn get(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(CacheCommand::Get { key: key.into() });
        self
    }

    /// Queues a write with an optional TTL.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>, ttl: Option<u64>) -> &mut Self {
        self.commands.push(CacheCommand::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    /// Queues a write that expires after `ttl_seconds`.
    pub fn setex(&mut self, key: impl Into<String>, ttl_seconds: u64, value: impl Into<Value>) -> &mut Self {
        self.set(key, value, Some(ttl_seconds))
    }

    /// Queues a delete.
    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(CacheCommand::Del { key: key.into() });
        self
    }

    /// Queues a set insertion.
    pub fn sadd(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.commands.push(CacheCommand::SAdd {
            key: key.into(),
            members,
        });
        self
    }

    /// Queues a multi-field hash write.
    pub fn hset(&mut self, key: impl Into<String>, fields: Vec<(String, Value)>) -> &mut Self {
        self.commands.push(CacheCommand::HSet {
            key: key.into(),
            fields,
        });
        self
    }

    /// Queues a single-field hash write.
    pub fn hset_field(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.hset(key, vec![(field.into(), value.into())])
    }

    /// Queues a hash read.
    pub fn hgetall(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(CacheCommand::HGetAll { key: key.into() });
        self
    }

    /// Queues a hash field increment.
    pub fn hincrby(&mut self, key: impl Into<String>, field: impl Into<String>, by: i64) -> &mut Self {
        self.commands.push(CacheCommand::HIncrBy {
            key: key.into(),
            field: field.into(),
            by,
        });
        self
    }

    /// Queues a counter increment.
    pub fn incr(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(CacheCommand::Incr { key: key.into() });
        self
    }

    /// Number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing has been queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sends the batch and returns per-command results in submission order.
    pub async fn exec(self) -> Vec<Value> {
        if self.commands.is_empty() {
            return Vec::new();
        }
        self.provider.exec_pipeline(self.commands).await
    }
}

/// Encodes a hash field value: plain strings verbatim, everything else as JSON text.
///
/// A string that would itself parse as JSON (`"123"`, `"null"`) is stored
/// quoted so [`decode_field`] hands it back as the same string.
#[must_use]
pub fn encode_field(value: &Value) -> String {
    match value {
        Value::String(s) if serde_json::from_str::<Value>(s).is_ok() => value.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decodes a stored hash field: JSON when parseable, else the raw string.
#[must_use]
pub fn decode_field(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Decodes a stored top-level value (always JSON text, raw string as a fallback).
#[must_use]
pub fn decode_value(raw: &str) -> Value {
    decode_field(raw)
}

/// Available cache backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Self-hosted Redis, standalone or cluster.
    Redis,
    /// Hosted key-value REST service.
    VercelKv,
    /// In-process store.
    Memory,
}

impl FromStr for CacheKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(CacheKind::Redis),
            "vercel-kv" | "vercel_kv" | "kv" => Ok(CacheKind::VercelKv),
            "memory" => Ok(CacheKind::Memory),
            other => Err(format!("unknown cache provider '{other}'")),
        }
    }
}

/// Chooses a backend from configuration.
///
/// Explicit provider first; otherwise Redis if a connection string is set,
/// then hosted KV if credentials are set, else hosted KV with a warning.
#[must_use]
pub fn select_cache_kind(config: &CacheConfig) -> CacheKind {
    if let Some(name) = config.provider.as_deref() {
        match name.parse::<CacheKind>() {
            Ok(kind) => return kind,
            Err(e) => warn!(error = %e, "Ignoring CACHE_PROVIDER, auto-detecting"),
        }
    }

    if config.redis_url.is_some() {
        return CacheKind::Redis;
    }
    if config.kv_rest_api_url.is_some() && config.kv_rest_api_token.is_some() {
        return CacheKind::VercelKv;
    }

    warn!("No cache backend configured, defaulting to hosted KV; cache calls will miss");
    CacheKind::VercelKv
}

/// Creates the configured cache provider.
///
/// # Errors
///
/// Fails fast if Redis is selected and its connection string is missing or
/// cannot be parsed.
pub fn create_cache_provider(config: &CacheConfig) -> Result<Arc<dyn CacheProvider>> {
    let timeout = Duration::from_millis(config.operation_timeout_ms);
    let kind = select_cache_kind(config);
    info!(?kind, "Creating cache provider");

    let provider: Arc<dyn CacheProvider> = match kind {
        CacheKind::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                crate::error::RepoMindError::MissingCredential {
                    provider: "redis".to_string(),
                    env_var: "REDIS_URL".to_string(),
                }
            })?;
            Arc::new(RedisCache::new(url, timeout)?)
        }
        CacheKind::VercelKv => Arc::new(KvCache::new(
            config.kv_rest_api_url.as_deref(),
            config.kv_rest_api_token.as_deref(),
            timeout,
        )?),
        CacheKind::Memory => Arc::new(MemoryCache::new()),
    };

    Ok(provider)
}
