//! TTL key/value cache consumed by every recommendation engine.
//!
//! The cache is an optimization, never a correctness dependency: callers
//! treat a miss and a cache failure identically and fall back to computing
//! directly.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::RwLock;

/// キャッシュキーのプレフィックス。再訓練後の一括無効化はこの集合を対象にする。
pub mod prefix {
    pub const COLLABORATIVE: &str = "collaborative";
    pub const CONTENT_BASED: &str = "content_based";
    pub const AUTHOR_BASED: &str = "author_based";
    pub const POPULAR_BOOKS: &str = "popular_books";
    pub const CONTINUE_READING: &str = "continue_reading";
    pub const SERIES: &str = "series";

    /// Every prefix cleared by the post-training invalidation step.
    pub const RECOMMENDATION_PREFIXES: &[&str] = &[
        COLLABORATIVE,
        CONTENT_BASED,
        AUTHOR_BASED,
        POPULAR_BOOKS,
        CONTINUE_READING,
    ];
}

/// Key/value cache with optional per-key TTL and prefix-pattern deletion.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    /// Set a value; `ttl = None` keeps the key until explicitly deleted.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> anyhow::Result<()>;

    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    /// Delete every key matching `pattern` ("prefix:*") in one logical
    /// operation. Returns the number of keys removed.
    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<usize>;
}

/// Deterministic cache key: prefix plus the md5 of the stable (sorted)
/// serialization of the query parameters, so identical queries always hit
/// the same key.
#[must_use]
pub fn cache_key(prefix: &str, params: &[(&str, &str)]) -> String {
    let mut sorted: Vec<(&str, &str)> = params.to_vec();
    sorted.sort_unstable();
    let canonical = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let digest = md5::compute(canonical.as_bytes());
    format!("{prefix}:{digest:x}")
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process cache implementation.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<FxHashMap<String, Entry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheLayer for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: drop the entry lazily under the write lock.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> anyhow::Result<()> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<usize> {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }
}
