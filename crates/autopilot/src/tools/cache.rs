//! Tool result caching.
//!
//! Avoids re-running identical read-only tool calls within a short window.
//! Results of tools that report `cacheable() == true` are stored under
//! `(tool_name, arguments_hash)` for a fixed time-to-live. Only successful
//! outcomes are stored. Argument JSON is canonicalized first so key order and
//! whitespace do not defeat the cache.

use crate::tools::core::ToolOutcome;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A cache entry for a tool result.
#[derive(Debug, Clone)]
struct CacheEntry {
    outcome: ToolOutcome,
    stored_at: Instant,
}

/// TTL cache for tool outcomes, keyed by (tool_name, arguments_hash).
#[derive(Debug)]
pub struct ToolResultCache {
    entries: HashMap<(String, u64), CacheEntry>,
    ttl: Duration,
    /// Maximum number of entries before eviction.
    max_entries: usize,
    hits: u64,
    misses: u64,
}

impl ToolResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a fresh cached outcome.
    pub fn get(&mut self, tool_name: &str, arguments: &str) -> Option<ToolOutcome> {
        let key = (tool_name.to_string(), hash_arguments(arguments));
        let fresh = self
            .entries
            .get(&key)
            .filter(|e| e.stored_at.elapsed() < self.ttl)
            .map(|e| e.outcome.clone());
        match fresh {
            Some(outcome) => {
                self.hits += 1;
                Some(outcome)
            }
            None => {
                self.entries.remove(&key);
                self.misses += 1;
                None
            }
        }
    }

    /// Store an outcome. Failed outcomes are ignored.
    pub fn put(&mut self, tool_name: &str, arguments: &str, outcome: &ToolOutcome) {
        if !outcome.success {
            return;
        }
        if self.entries.len() >= self.max_entries {
            self.evict_expired();
        }
        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            (tool_name.to_string(), hash_arguments(arguments)),
            CacheEntry {
                outcome: outcome.clone(),
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every entry (e.g. after a tool that changes the filesystem).
    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.stored_at.elapsed() < ttl);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|(_, v)| v.stored_at)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&oldest_key);
        }
    }
}

impl Default for ToolResultCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 256)
    }
}

/// Canonical form of an arguments string: parsed and re-serialized (object
/// keys sorted), or the raw string when it is not valid JSON.
fn canonical_arguments(arguments: &str) -> String {
    serde_json::from_str::<serde_json::Value>(arguments)
        .map(|v| sort_keys(v).to_string())
        .unwrap_or_else(|_| arguments.to_string())
}

fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// FNV-1a hash of the canonical arguments.
fn hash_arguments(arguments: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in canonical_arguments(arguments).as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
