// SPDX-License-Identifier: Apache-2.0

//! Visitor and query analytics stored in the cache backend.
//!
//! Layout:
//!
//! - `analytics:visitors`: set of visitor ids
//! - `visitor:{id}`: hash with `firstSeen`, `lastSeen`, `country`, `device`,
//!   `userAgent`, `queryCount`
//! - `analytics:total_queries`: global query counter
//! - `analytics:country:{code}` and `analytics:device:{kind}`: event counters
//!
//! Visitor hashes never expire. Tracking never fails the caller.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::cache::CacheProvider;

/// Set of all visitor ids.
pub const VISITORS_KEY: &str = "analytics:visitors";
/// Global query counter.
pub const TOTAL_QUERIES_KEY: &str = "analytics:total_queries";

const UNKNOWN: &str = "Unknown";
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Hash key for one visitor.
#[must_use]
pub fn visitor_key(id: &str) -> String {
    format!("visitor:{id}")
}

fn country_key(country: &str) -> String {
    format!("analytics:country:{country}")
}

fn device_key(device: &str) -> String {
    format!("analytics:device:{device}")
}

/// Kind of tracked event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Page view or session start.
    Visit,
    /// A question asked to the assistant.
    Query,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Visit => write!(f, "visit"),
            EventType::Query => write!(f, "query"),
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "visit" | "pageview" => Ok(EventType::Visit),
            "query" => Ok(EventType::Query),
            other => Err(format!("unknown event type '{other}'")),
        }
    }
}

/// Optional request attributes attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// ISO country code.
    pub country: Option<String>,
    /// Device class (`mobile`, `tablet`, `desktop`).
    pub device: Option<String>,
    /// Raw user agent.
    pub user_agent: Option<String>,
}

/// Reconstructed visitor hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorRecord {
    /// Visitor id.
    pub id: String,
    /// Last reported country.
    pub country: String,
    /// Last reported device class.
    pub device: String,
    /// User agent from the first event.
    pub user_agent: String,
    /// First event time, epoch milliseconds.
    pub first_seen: i64,
    /// Latest event time, epoch milliseconds.
    pub last_seen: i64,
    /// Number of queries asked.
    pub query_count: i64,
}

fn coerce_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Null) | None => UNKNOWN.to_string(),
        Some(other) => other.to_string(),
    }
}

impl VisitorRecord {
    /// Rebuilds a record from a stored hash, coercing numeric strings.
    #[must_use]
    pub fn from_hash(id: &str, hash: &HashMap<String, Value>) -> Self {
        Self {
            id: id.to_string(),
            country: coerce_string(hash.get("country")),
            device: coerce_string(hash.get("device")),
            user_agent: coerce_string(hash.get("userAgent")),
            first_seen: coerce_i64(hash.get("firstSeen")),
            last_seen: coerce_i64(hash.get("lastSeen")),
            query_count: coerce_i64(hash.get("queryCount")),
        }
    }
}

/// Aggregate view derived on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    /// Distinct visitors.
    pub total_visitors: u64,
    /// Queries across all visitors.
    pub total_queries: u64,
    /// Visitors seen in the last 24 hours.
    pub active_users_24h: u64,
    /// Visitors per device class.
    pub device_stats: BTreeMap<String, u64>,
    /// Visitors per country.
    pub country_stats: BTreeMap<String, u64>,
    /// Visitors, most recently seen first.
    pub recent_visitors: Vec<VisitorRecord>,
}

/// Classifies a user agent as `mobile`, `tablet` or `desktop`.
#[must_use]
pub fn classify_device(user_agent: &str) -> &'static str {
    let ua = user_agent.to_lowercase();
    if ua.contains("ipad") || ua.contains("tablet") || (ua.contains("android") && !ua.contains("mobile")) {
        "tablet"
    } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
        "mobile"
    } else {
        "desktop"
    }
}

/// Records an event at the current time.
pub async fn track_event(
    cache: &dyn CacheProvider,
    visitor_id: &str,
    event: EventType,
    metadata: &EventMetadata,
) {
    track_event_at(cache, visitor_id, event, metadata, Utc::now().timestamp_millis()).await;
}

/// Records an event at `now_ms` in one pipelined batch.
///
/// The existence check for first-seen fields runs before the batch and is not
/// atomic with it; two concurrent first events may both write the static
/// fields.
#[instrument(skip(cache, metadata))]
pub async fn track_event_at(
    cache: &dyn CacheProvider,
    visitor_id: &str,
    event: EventType,
    metadata: &EventMetadata,
    now_ms: i64,
) {
    let key = visitor_key(visitor_id);
    let known = cache.exists(&key).await;

    let mut pipe = cache.pipeline();
    pipe.sadd(VISITORS_KEY, vec![visitor_id.to_string()]);

    if !known {
        let or_unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| UNKNOWN.to_string());
        pipe.hset(
            key.clone(),
            vec![
                ("firstSeen".to_string(), Value::from(now_ms)),
                ("country".to_string(), or_unknown(&metadata.country).into()),
                ("device".to_string(), or_unknown(&metadata.device).into()),
                ("userAgent".to_string(), or_unknown(&metadata.user_agent).into()),
                ("queryCount".to_string(), Value::from(0)),
            ],
        );
    }

    let mut dynamic = vec![("lastSeen".to_string(), Value::from(now_ms))];
    if let Some(country) = &metadata.country {
        dynamic.push(("country".to_string(), country.clone().into()));
    }
    if let Some(device) = &metadata.device {
        dynamic.push(("device".to_string(), device.clone().into()));
    }
    pipe.hset(key.clone(), dynamic);

    if event == EventType::Query {
        pipe.incr(TOTAL_QUERIES_KEY);
        pipe.hincrby(key, "queryCount", 1);
    }
    if let Some(country) = &metadata.country {
        pipe.incr(country_key(country));
    }
    if let Some(device) = &metadata.device {
        pipe.incr(device_key(device));
    }

    let queued = pipe.len();
    let results = pipe.exec().await;
    if results.len() == queued {
        debug!(new_visitor = !known, "Tracked event");
    } else {
        warn!(queued, applied = results.len(), "Analytics batch was not applied");
    }
}

/// Total queries recorded so far.
pub async fn get_total_queries(cache: &dyn CacheProvider) -> u64 {
    cache
        .get_json(TOTAL_QUERIES_KEY)
        .await
        .map_or(0, |v| u64::try_from(coerce_i64(Some(&v))).unwrap_or(0))
}

/// Builds the analytics snapshot at the current time.
pub async fn get_analytics_data(cache: &dyn CacheProvider) -> AnalyticsSnapshot {
    get_analytics_data_at(cache, Utc::now().timestamp_millis()).await
}

/// Builds the analytics snapshot as of `now_ms`.
///
/// Histograms are rebuilt from the visitor hashes rather than the global
/// counters, so the report is consistent with the visitor list.
#[instrument(skip(cache))]
pub async fn get_analytics_data_at(cache: &dyn CacheProvider, now_ms: i64) -> AnalyticsSnapshot {
    let (total_visitors, total_queries, ids) = tokio::join!(
        cache.scard(VISITORS_KEY),
        get_total_queries(cache),
        cache.smembers(VISITORS_KEY),
    );

    if ids.is_empty() {
        return AnalyticsSnapshot::default();
    }

    let mut pipe = cache.pipeline();
    for id in &ids {
        pipe.hgetall(visitor_key(id));
    }
    let hashes = pipe.exec().await;
    if hashes.len() != ids.len() {
        warn!(expected = ids.len(), got = hashes.len(), "Visitor hash batch incomplete");
    }

    let mut visitors: Vec<VisitorRecord> = ids
        .iter()
        .zip(hashes)
        .filter_map(|(id, hash)| match hash {
            Value::Object(map) if !map.is_empty() => {
                let fields: HashMap<String, Value> = map.into_iter().collect();
                Some(VisitorRecord::from_hash(id, &fields))
            }
            _ => None,
        })
        .collect();

    let cutoff = now_ms - DAY_MS;
    let mut snapshot = AnalyticsSnapshot {
        total_visitors,
        total_queries,
        ..AnalyticsSnapshot::default()
    };

    for visitor in &visitors {
        if visitor.last_seen > cutoff {
            snapshot.active_users_24h += 1;
        }
        *snapshot
            .device_stats
            .entry(visitor.device.clone())
            .or_default() += 1;
        *snapshot
            .country_stats
            .entry(visitor.country.clone())
            .or_default() += 1;
    }

    visitors.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    snapshot.recent_visitors = visitors;
    snapshot
}
