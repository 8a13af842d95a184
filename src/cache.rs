//! In-memory response cache with lazy TTL eviction.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;
use serde_json::Value;

/// Entry lifetime applied when a request does not choose its own.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry {
    payload: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

/// Key→payload store consulted before a request goes to the network.
///
/// Keys are caller-chosen strings. An expired entry is logically absent and
/// is removed by the read that finds it; there is no background sweep.
/// Concurrent misses for the same key each take the network path and each
/// write back independently, last write wins.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the payload stored under `key` if it is still within its TTL,
    /// evicting it when it has expired.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.payload.clone()),
            Some(_) => {
                debug!("Cache entry '{}' expired, evicting", key);
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `payload` under `key`, overwriting any existing entry.
    pub fn set(&self, key: &str, payload: Value, ttl: Option<Duration>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                stored_at: Instant::now(),
                ttl: ttl.unwrap_or(DEFAULT_TTL),
            },
        );
    }

    /// Number of stored entries, including any not yet evicted by a read.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_returns_payload_within_ttl() {
        let cache = ResponseCache::new();
        cache.set("metrics", json!({"violations": 3}), None);

        assert_eq!(cache.get("metrics"), Some(json!({"violations": 3})));
    }

    #[test]
    fn test_get_is_idempotent() {
        let cache = ResponseCache::new();
        cache.set("metrics", json!([1, 2, 3]), None);

        assert_eq!(cache.get("metrics"), cache.get("metrics"));
    }

    #[test]
    fn test_expired_entry_is_absent_and_evicted() {
        let cache = ResponseCache::new();
        cache.set("metrics", json!("stale"), Some(Duration::ZERO));

        assert_eq!(cache.get("metrics"), None);
        // The expired entry was removed by the read, not just hidden.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_overwrites_unconditionally() {
        let cache = ResponseCache::new();
        cache.set("policies", json!("old"), None);
        cache.set("policies", json!("new"), None);

        assert_eq!(cache.get("policies"), Some(json!("new")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let cache = ResponseCache::new();
        cache.set("a", json!(1), None);
        cache.set("b", json!(2), Some(Duration::ZERO));

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(json!(1)));
    }

    #[test]
    fn test_missing_key_is_none() {
        let cache = ResponseCache::new();
        assert_eq!(cache.get("nothing"), None);
    }
}
