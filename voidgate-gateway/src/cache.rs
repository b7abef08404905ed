//! # Cache & Rate Limiter
//!
//! `Cache` is the key/value-with-TTL contract spec §6 names as an external
//! collaborator; `InMemoryCache` is the in-process stand-in, modeled on the
//! teacher's `gateway_caching.rs`. `RateLimiter` is built on top of it: a
//! sliding 60s window keyed by API-key prefix or client IP (spec §6).

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, value: Vec<u8>);
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration);
    async fn delete(&self, key: &str);
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// Lazily-expiring in-memory map: entries are only evicted when touched
/// (`get`) or superseded (`set`), same trade-off the teacher's cache layer
/// makes rather than running a background sweep.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expires_at.map(|t| Instant::now() >= t).unwrap_or(false),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    async fn set(&self, key: &str, value: Vec<u8>) {
        self.entries.insert(key.to_string(), Entry { value, expires_at: None });
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const RATE_LIMIT_MAX_REQUESTS: u32 = 100;

#[derive(Debug, Serialize, Deserialize)]
struct RateLimitRecord {
    count: u32,
    window_started_at_ms: i64,
}

pub struct RateLimiter {
    cache: std::sync::Arc<dyn Cache>,
}

impl RateLimiter {
    pub fn new(cache: std::sync::Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// First 16 chars of an API key, or the raw client IP, per spec §6.
    pub fn key_for(identity: &str) -> String {
        let prefix: String = identity.chars().take(16).collect();
        format!("rate_limit:{prefix}")
    }

    /// Returns `true` if this request is admitted under the sliding 60s,
    /// 100 req/min window (spec §6). `now_ms` lets callers and tests
    /// control the clock instead of reading real time inside the cache.
    pub async fn check(&self, identity: &str, now_ms: i64) -> bool {
        let key = Self::key_for(identity);
        let record = match self.cache.get(&key).await {
            Some(bytes) => serde_json::from_slice::<RateLimitRecord>(&bytes).ok(),
            None => None,
        };
        let window_ms = RATE_LIMIT_WINDOW.as_millis() as i64;
        let mut record = match record {
            Some(r) if now_ms - r.window_started_at_ms < window_ms => r,
            _ => RateLimitRecord {
                count: 0,
                window_started_at_ms: now_ms,
            },
        };
        if record.count >= RATE_LIMIT_MAX_REQUESTS {
            return false;
        }
        record.count += 1;
        let remaining = window_ms - (now_ms - record.window_started_at_ms);
        let ttl = Duration::from_millis(remaining.max(0) as u64);
        if let Ok(bytes) = serde_json::to_vec(&record) {
            self.cache.set_with_ttl(&key, bytes, ttl).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_expire_after_ttl() {
        let cache = InMemoryCache::default();
        cache.set_with_ttl("k", b"v".to_vec(), Duration::from_millis(10)).await;
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn rate_limiter_admits_up_to_the_cap_then_rejects() {
        let cache = std::sync::Arc::new(InMemoryCache::default());
        let limiter = RateLimiter::new(cache);
        for _ in 0..RATE_LIMIT_MAX_REQUESTS {
            assert!(limiter.check("sk-voidai-abc123", 0).await);
        }
        assert!(!limiter.check("sk-voidai-abc123", 0).await);
    }

    #[tokio::test]
    async fn rate_limiter_resets_once_the_window_elapses() {
        let cache = std::sync::Arc::new(InMemoryCache::default());
        let limiter = RateLimiter::new(cache);
        for _ in 0..RATE_LIMIT_MAX_REQUESTS {
            assert!(limiter.check("1.2.3.4", 0).await);
        }
        assert!(!limiter.check("1.2.3.4", 0).await);
        assert!(limiter.check("1.2.3.4", 60_001).await);
    }
}
