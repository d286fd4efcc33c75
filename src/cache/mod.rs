//! Two-tier response cache (spec §4.3): an in-process local tier backed
//! by a shared remote Redis tier. Reads check local first, then remote
//! (populating local on a remote hit); writes go to both tiers.
//!
//! Grounded on `original_source/services/cache.py`'s `CacheManager`
//! (local dict + redis client, same get/set/invalidate shape) and the
//! teacher's connection-pooled service clients for the redis wiring
//! idiom (`crates/m3u-proxy/src/services/*` use a shared async client
//! handle passed around in `Arc`).

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};

use crate::config::CacheConfig;

struct LocalEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Two-tier cache: `local` is a process-local, capacity-bounded LRU map
/// with its own TTL check on read; `redis` (when configured) is the
/// authoritative cross-instance tier.
pub struct Cache {
    local: Mutex<LruCache<String, LocalEntry>>,
    redis: Option<redis::aio::ConnectionManager>,
    local_ttl: Duration,
    remote_ttl: Duration,
}

impl Cache {
    pub fn new(config: &CacheConfig, redis: Option<redis::aio::ConnectionManager>) -> Self {
        let capacity = NonZeroUsize::new(config.max_local_cache_size.max(1)).expect("nonzero");
        Self {
            local: Mutex::new(LruCache::new(capacity)),
            redis,
            local_ttl: Duration::from_secs(config.local_ttl_secs),
            remote_ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    /// Canonical cache key: `gateway_cache:<METHOD>:<path>:<query>`
    /// (spec §9 — the gateway-level scheme, not the upstream's own
    /// cache headers).
    pub fn key(method: &str, path: &str, query: &str) -> String {
        format!("gateway_cache:{method}:{path}:{query}")
    }

    /// Local hit first; on a local miss, fall through to redis and
    /// repopulate the local tier so the next request for the same key
    /// is served without a network round trip.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(value) = self.get_local(key) {
            return serde_json::from_value(value).ok();
        }
        let raw = self.get_remote(key).await?;
        let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
        self.put_local(key, value.clone());
        serde_json::from_value(value).ok()
    }

    fn get_local(&self, key: &str) -> Option<serde_json::Value> {
        let mut guard = self.local.lock().expect("cache mutex poisoned");
        match guard.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                guard.pop(key);
                None
            }
            None => None,
        }
    }

    async fn get_remote(&self, key: &str) -> Option<String> {
        let mut conn = self.redis.clone()?;
        conn.get::<_, Option<String>>(key).await.ok().flatten()
    }

    /// Write-through: local tier immediately, remote tier best-effort
    /// (a redis error must never fail the response path — spec §4.3
    /// edge case: "cache unavailable degrades to pass-through, not an
    /// error").
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let Ok(json) = serde_json::to_value(value) else {
            return;
        };
        self.put_local(key, json.clone());
        if let Some(mut conn) = self.redis.clone() {
            if let Ok(raw) = serde_json::to_string(&json) {
                let _: Result<(), _> = conn
                    .set_ex::<_, _, ()>(key, raw, self.remote_ttl.as_secs().max(1))
                    .await;
            }
        }
    }

    fn put_local(&self, key: &str, value: serde_json::Value) {
        let mut guard = self.local.lock().expect("cache mutex poisoned");
        guard.put(
            key.to_string(),
            LocalEntry {
                value,
                expires_at: Instant::now() + self.local_ttl,
            },
        );
    }

    /// Remove every entry (either tier) whose key *contains* `prefix`,
    /// not just an exact match — a `POST /users/42` must invalidate every
    /// cached `GET` under `/users/*`, not just one fully-qualified key
    /// (spec §4.3, grounded on
    /// `original_source/services/cache.py::CacheManager.invalidate`'s
    /// `pattern in k` / `KEYS *pattern*` scan). Remote scan runs
    /// best-effort: a redis error must not surface to the caller.
    pub async fn invalidate(&self, prefix: &str) {
        {
            let mut guard = self.local.lock().expect("cache mutex poisoned");
            let stale: Vec<String> = guard
                .iter()
                .filter(|(k, _)| k.contains(prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                guard.pop(&key);
            }
        }
        if let Some(mut conn) = self.redis.clone() {
            let pattern = format!("*{prefix}*");
            if let Ok(keys) = conn.keys::<_, Vec<String>>(&pattern).await
                && !keys.is_empty()
            {
                let _: Result<(), _> = conn.del::<_, ()>(keys).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> Cache {
        Cache::new(
            &CacheConfig {
                ttl_secs: 60,
                local_ttl_secs: 10,
                max_local_cache_size: 2,
            },
            None,
        )
    }

    #[test]
    fn key_scheme_matches_spec() {
        assert_eq!(
            Cache::key("GET", "/api/users", "page=1"),
            "gateway_cache:GET:/api/users:page=1"
        );
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let cache = cache();
        cache.set("k1", &serde_json::json!({"a": 1})).await;
        let value: Option<serde_json::Value> = cache.get("k1").await;
        assert_eq!(value, Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn get_then_invalidate_then_miss() {
        let cache = cache();
        cache.set("k1", &serde_json::json!("v")).await;
        assert!(cache.get::<serde_json::Value>("k1").await.is_some());
        cache.invalidate("k1").await;
        assert!(cache.get::<serde_json::Value>("k1").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_matches_any_key_containing_prefix() {
        let cache = cache();
        let get_key = Cache::key("GET", "/api/users/42", "");
        let list_key = Cache::key("GET", "/api/users", "page=1");
        cache.set(&get_key, &serde_json::json!("a")).await;
        cache.set(&list_key, &serde_json::json!("b")).await;
        cache.invalidate("users").await;
        assert!(cache.get::<serde_json::Value>(&get_key).await.is_none());
        assert!(cache.get::<serde_json::Value>(&list_key).await.is_none());
    }

    #[tokio::test]
    async fn prunes_over_capacity_local_entries() {
        let cache = cache();
        cache.set("k1", &serde_json::json!(1)).await;
        cache.set("k2", &serde_json::json!(2)).await;
        cache.set("k3", &serde_json::json!(3)).await;
        let local = cache.local.lock().unwrap();
        assert!(local.len() <= 2);
    }
}
