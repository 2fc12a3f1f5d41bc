// SPDX-License-Identifier: Apache-2.0

//! In-process cache backend.
//!
//! Same semantics as the network backends, including TTL expiry and glob
//! `KEYS`. Used with `CACHE_PROVIDER=memory` and as the test double for the
//! caching and analytics layers.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use tracing::warn;

use super::{CacheCommand, CacheProvider, decode_field, encode_field};

#[derive(Debug, Clone)]
enum Stored {
    Text(String),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Cache held in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A poisoned map still holds consistent entries; keep serving it.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn purge_expired(map: &mut HashMap<String, Entry>, key: &str) {
        let now = Instant::now();
        if map.get(key).is_some_and(|e| !e.live(now)) {
            map.remove(key);
        }
    }

    fn apply(map: &mut HashMap<String, Entry>, command: CacheCommand) -> Value {
        match command {
            CacheCommand::Get { key } => {
                Self::purge_expired(map, &key);
                match map.get(&key).map(|e| &e.value) {
                    Some(Stored::Text(raw)) => decode_field(raw),
                    _ => Value::Null,
                }
            }
            CacheCommand::Set { key, value, ttl } => {
                let expires_at = ttl.map(|secs| Instant::now() + Duration::from_secs(secs));
                map.insert(
                    key,
                    Entry {
                        value: Stored::Text(value.to_string()),
                        expires_at,
                    },
                );
                json!("OK")
            }
            CacheCommand::Del { key } => {
                Self::purge_expired(map, &key);
                json!(u64::from(map.remove(&key).is_some()))
            }
            CacheCommand::SAdd { key, members } => {
                Self::purge_expired(map, &key);
                let entry = map.entry(key).or_insert_with(|| Entry {
                    value: Stored::Set(HashSet::new()),
                    expires_at: None,
                });
                let Stored::Set(set) = &mut entry.value else {
                    return Value::Null;
                };
                let added = members.into_iter().filter(|m| set.insert(m.clone())).count();
                json!(added)
            }
            CacheCommand::HSet { key, fields } => {
                Self::purge_expired(map, &key);
                let entry = map.entry(key).or_insert_with(|| Entry {
                    value: Stored::Hash(HashMap::new()),
                    expires_at: None,
                });
                let Stored::Hash(hash) = &mut entry.value else {
                    return Value::Null;
                };
                let added = fields
                    .into_iter()
                    .filter(|(field, value)| hash.insert(field.clone(), encode_field(value)).is_none())
                    .count();
                json!(added)
            }
            CacheCommand::HGetAll { key } => {
                Self::purge_expired(map, &key);
                match map.get(&key).map(|e| &e.value) {
                    Some(Stored::Hash(hash)) => Value::Object(
                        hash.iter()
                            .map(|(k, v)| (k.clone(), decode_field(v)))
                            .collect(),
                    ),
                    _ => json!({}),
                }
            }
            CacheCommand::HIncrBy { key, field, by } => {
                Self::purge_expired(map, &key);
                let entry = map.entry(key).or_insert_with(|| Entry {
                    value: Stored::Hash(HashMap::new()),
                    expires_at: None,
                });
                let Stored::Hash(hash) = &mut entry.value else {
                    return Value::Null;
                };
                let current = hash
                    .get(&field)
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(0);
                let next = current + by;
                hash.insert(field, next.to_string());
                json!(next)
            }
            CacheCommand::Incr { key } => {
                Self::purge_expired(map, &key);
                let entry = map.entry(key).or_insert_with(|| Entry {
                    value: Stored::Text("0".to_string()),
                    expires_at: None,
                });
                let Stored::Text(raw) = &mut entry.value else {
                    return Value::Null;
                };
                let Ok(current) = raw.parse::<i64>() else {
                    return Value::Null;
                };
                let next = current + 1;
                *raw = next.to_string();
                json!(next)
            }
        }
    }

    fn run(&self, command: CacheCommand) -> Value {
        let mut map = self.lock();
        Self::apply(&mut map, command)
    }
}

/// Translates a `KEYS` glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 2);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

fn as_i64(value: &Value) -> i64 {
    value.as_i64().unwrap_or(0)
}

fn as_u64(value: &Value) -> u64 {
    value.as_u64().unwrap_or(0)
}

#[async_trait]
impl CacheProvider for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_json(&self, key: &str) -> Option<Value> {
        match self.run(CacheCommand::Get { key: key.to_string() }) {
            Value::Null => None,
            value => Some(value),
        }
    }

    async fn set_json(&self, key: &str, value: &Value, ttl: Option<Duration>) -> bool {
        let ttl = ttl.map(|d| d.as_secs().max(1));
        self.run(CacheCommand::Set {
            key: key.to_string(),
            value: value.clone(),
            ttl,
        }) == json!("OK")
    }

    async fn del(&self, key: &str) -> bool {
        as_u64(&self.run(CacheCommand::Del { key: key.to_string() })) > 0
    }

    async fn exists(&self, key: &str) -> bool {
        let mut map = self.lock();
        Self::purge_expired(&mut map, key);
        map.contains_key(key)
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn sadd(&self, key: &str, members: &[String]) -> u64 {
        as_u64(&self.run(CacheCommand::SAdd {
            key: key.to_string(),
            members: members.to_vec(),
        }))
    }

    async fn smembers(&self, key: &str) -> Vec<String> {
        let mut map = self.lock();
        Self::purge_expired(&mut map, key);
        match map.get(key).map(|e| &e.value) {
            Some(Stored::Set(set)) => set.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    async fn scard(&self, key: &str) -> u64 {
        let mut map = self.lock();
        Self::purge_expired(&mut map, key);
        match map.get(key).map(|e| &e.value) {
            Some(Stored::Set(set)) => set.len() as u64,
            _ => 0,
        }
    }

    async fn hset(&self, key: &str, fields: &[(String, Value)]) -> u64 {
        as_u64(&self.run(CacheCommand::HSet {
            key: key.to_string(),
            fields: fields.to_vec(),
        }))
    }

    async fn hgetall(&self, key: &str) -> HashMap<String, Value> {
        match self.run(CacheCommand::HGetAll { key: key.to_string() }) {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        }
    }

    async fn hincrby(&self, key: &str, field: &str, by: i64) -> i64 {
        as_i64(&self.run(CacheCommand::HIncrBy {
            key: key.to_string(),
            field: field.to_string(),
            by,
        }))
    }

    async fn incr(&self, key: &str) -> i64 {
        as_i64(&self.run(CacheCommand::Incr { key: key.to_string() }))
    }

    async fn keys(&self, pattern: &str) -> Vec<String> {
        let Some(re) = glob_to_regex(pattern) else {
            warn!(pattern, "Unsupported KEYS pattern");
            return Vec::new();
        };
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .lock()
            .iter()
            .filter(|(k, e)| e.live(now) && re.is_match(k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    async fn exec_pipeline(&self, commands: Vec<CacheCommand>) -> Vec<Value> {
        // Holding the lock for the whole batch makes it atomic like MULTI/EXEC.
        let mut map = self.lock();
        commands
            .into_iter()
            .map(|command| Self::apply(&mut map, command))
            .collect()
    }
}
