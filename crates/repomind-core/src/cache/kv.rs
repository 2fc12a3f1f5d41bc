// SPDX-License-Identifier: Apache-2.0

//! Hosted key-value backend speaking the Upstash-style REST protocol.
//!
//! Each command is POSTed as a JSON array (`["SET","k","v","EX","60"]`) and
//! answered with `{"result": ...}` or `{"error": "..."}`. Pipelines go to
//! `/multi-exec` and run as one transaction.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{CacheCommand, CacheProvider, decode_field, decode_value, encode_field};

#[derive(Debug, Deserialize)]
struct KvReply {
    #[serde(default)]
    result: Value,
    error: Option<String>,
}

struct Endpoint {
    url: String,
    token: SecretString,
}

/// REST-backed [`CacheProvider`].
///
/// Without credentials every call logs at debug level and misses.
pub struct KvCache {
    http: Client,
    endpoint: Option<Endpoint>,
}

impl std::fmt::Debug for KvCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvCache")
            .field("url", &self.endpoint.as_ref().map(|e| e.url.as_str()))
            .finish_non_exhaustive()
    }
}

impl KvCache {
    /// Creates a client for the given endpoint and token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Option<&str>, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        let endpoint = match (url, token) {
            (Some(url), Some(token)) => Some(Endpoint {
                url: url.trim_end_matches('/').to_string(),
                token: SecretString::from(token.to_string()),
            }),
            _ => {
                warn!("KV_REST_API_URL or KV_REST_API_TOKEN not set; hosted cache disabled");
                None
            }
        };
        Ok(Self { http, endpoint })
    }

    async fn post(&self, path: &str, body: &Value) -> Option<Value> {
        let Some(endpoint) = &self.endpoint else {
            debug!("Hosted cache not configured, skipping");
            return None;
        };

        let response = match self
            .http
            .post(format!("{}{path}", endpoint.url))
            .bearer_auth(endpoint.token.expose_secret())
            .json(body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "Hosted cache request failed");
                return None;
            }
        };

        let status = response.status();
        match response.json::<Value>().await {
            Ok(value) if status.is_success() => Some(value),
            Ok(value) => {
                warn!(%status, body = %value, "Hosted cache returned an error status");
                None
            }
            Err(e) => {
                warn!(%status, error = %e, "Hosted cache returned an unreadable body");
                None
            }
        }
    }

    async fn command(&self, args: Vec<String>) -> Option<Value> {
        let name = args.first().cloned().unwrap_or_default();
        let raw = self.post("", &json!(args)).await?;
        match serde_json::from_value::<KvReply>(raw) {
            Ok(KvReply { error: Some(e), .. }) => {
                warn!(command = %name, error = %e, "Hosted cache command failed");
                None
            }
            Ok(KvReply { result, .. }) => Some(result),
            Err(e) => {
                warn!(command = %name, error = %e, "Unexpected hosted cache reply");
                None
            }
        }
    }
}

/// Which decoding a reply needs.
#[derive(Clone, Copy)]
enum Reply {
    Json,
    Hash,
    Raw,
}

fn to_args(command: &CacheCommand) -> (Vec<String>, Reply) {
    match command {
        CacheCommand::Get { key } => (vec!["GET".into(), key.clone()], Reply::Json),
        CacheCommand::Set { key, value, ttl } => {
            let mut args = vec!["SET".into(), key.clone(), value.to_string()];
            if let Some(secs) = ttl {
                args.push("EX".into());
                args.push((*secs).max(1).to_string());
            }
            (args, Reply::Raw)
        }
        CacheCommand::Del { key } => (vec!["DEL".into(), key.clone()], Reply::Raw),
        CacheCommand::SAdd { key, members } => {
            let mut args = vec!["SADD".into(), key.clone()];
            args.extend(members.iter().cloned());
            (args, Reply::Raw)
        }
        CacheCommand::HSet { key, fields } => {
            let mut args = vec!["HSET".into(), key.clone()];
            for (field, value) in fields {
                args.push(field.clone());
                args.push(encode_field(value));
            }
            (args, Reply::Raw)
        }
        CacheCommand::HGetAll { key } => (vec!["HGETALL".into(), key.clone()], Reply::Hash),
        CacheCommand::HIncrBy { key, field, by } => (
            vec!["HINCRBY".into(), key.clone(), field.clone(), by.to_string()],
            Reply::Raw,
        ),
        CacheCommand::Incr { key } => (vec!["INCR".into(), key.clone()], Reply::Raw),
    }
}

/// Decodes an `HGETALL` reply, which arrives as a flat `[field, value, ...]` array.
fn hash_from_reply(result: &Value) -> HashMap<String, Value> {
    match result {
        Value::Array(items) => items
            .chunks(2)
            .filter_map(|pair| match pair {
                [Value::String(k), Value::String(v)] => Some((k.clone(), decode_field(v))),
                [Value::String(k), other] => Some((k.clone(), other.clone())),
                _ => None,
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k.clone(), decode_field(s)),
                other => (k.clone(), other.clone()),
            })
            .collect(),
        _ => HashMap::new(),
    }
}

fn reply_to_json(reply: Reply, result: Value) -> Value {
    match reply {
        Reply::Json => match result {
            Value::String(raw) => decode_value(&raw),
            _ => Value::Null,
        },
        Reply::Hash => Value::Object(hash_from_reply(&result).into_iter().collect()),
        Reply::Raw => result,
    }
}

fn as_i64(value: Option<Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn as_u64(value: Option<Value>) -> u64 {
    u64::try_from(as_i64(value)).unwrap_or(0)
}

#[async_trait]
impl CacheProvider for KvCache {
    fn name(&self) -> &'static str {
        "vercel-kv"
    }

    async fn get_json(&self, key: &str) -> Option<Value> {
        match self.command(vec!["GET".into(), key.into()]).await? {
            Value::String(raw) => Some(decode_value(&raw)),
            _ => None,
        }
    }

    async fn set_json(&self, key: &str, value: &Value, ttl: Option<Duration>) -> bool {
        let (args, _) = to_args(&CacheCommand::Set {
            key: key.to_string(),
            value: value.clone(),
            ttl: ttl.map(|d| d.as_secs()),
        });
        self.command(args).await.is_some()
    }

    async fn del(&self, key: &str) -> bool {
        as_i64(self.command(vec!["DEL".into(), key.into()]).await) > 0
    }

    async fn exists(&self, key: &str) -> bool {
        as_i64(self.command(vec!["EXISTS".into(), key.into()]).await) > 0
    }

    async fn ping(&self) -> bool {
        matches!(
            self.command(vec!["PING".into()]).await,
            Some(Value::String(s)) if s == "PONG"
        )
    }

    async fn sadd(&self, key: &str, members: &[String]) -> u64 {
        if members.is_empty() {
            return 0;
        }
        let (args, _) = to_args(&CacheCommand::SAdd {
            key: key.to_string(),
            members: members.to_vec(),
        });
        as_u64(self.command(args).await)
    }

    async fn smembers(&self, key: &str) -> Vec<String> {
        match self.command(vec!["SMEMBERS".into(), key.into()]).await {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn scard(&self, key: &str) -> u64 {
        as_u64(self.command(vec!["SCARD".into(), key.into()]).await)
    }

    async fn hset(&self, key: &str, fields: &[(String, Value)]) -> u64 {
        if fields.is_empty() {
            return 0;
        }
        let (args, _) = to_args(&CacheCommand::HSet {
            key: key.to_string(),
            fields: fields.to_vec(),
        });
        as_u64(self.command(args).await)
    }

    async fn hgetall(&self, key: &str) -> HashMap<String, Value> {
        self.command(vec!["HGETALL".into(), key.into()])
            .await
            .map(|result| hash_from_reply(&result))
            .unwrap_or_default()
    }

    async fn hincrby(&self, key: &str, field: &str, by: i64) -> i64 {
        as_i64(
            self.command(vec![
                "HINCRBY".into(),
                key.into(),
                field.into(),
                by.to_string(),
            ])
            .await,
        )
    }

    async fn incr(&self, key: &str) -> i64 {
        as_i64(self.command(vec!["INCR".into(), key.into()]).await)
    }

    async fn keys(&self, pattern: &str) -> Vec<String> {
        warn!(pattern, "KEYS is not supported by the hosted cache");
        Vec::new()
    }

    async fn exec_pipeline(&self, commands: Vec<CacheCommand>) -> Vec<Value> {
        let (batch, replies): (Vec<Vec<String>>, Vec<Reply>) = commands.iter().map(to_args).unzip();

        let Some(Value::Array(items)) = self.post("/multi-exec", &json!(batch)).await else {
            return Vec::new();
        };

        let mut results = Vec::with_capacity(items.len());
        for (reply, item) in replies.into_iter().zip(items) {
            match serde_json::from_value::<KvReply>(item) {
                Ok(KvReply { error: Some(e), .. }) => {
                    warn!(error = %e, "Hosted cache pipeline command failed");
                    results.push(Value::Null);
                }
                Ok(KvReply { result, .. }) => results.push(reply_to_json(reply, result)),
                Err(_) => results.push(Value::Null),
            }
        }
        results
    }
}
