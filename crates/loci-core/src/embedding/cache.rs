//! Embedding cache - content-hash keyed, LRU bounded, TTL aged.

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Cache key: sha256 over (model id, 0x1f, content).
pub type CacheKey = [u8; 32];

/// Derive the cache key for a (model, content) pair.
pub fn cache_key(model_id: &str, content: &str) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(content.as_bytes());
    hasher.finalize().into()
}

struct CacheEntry {
    vector: Vec<f32>,
    is_fallback: bool,
    created_at: DateTime<Utc>,
}

/// Counters exposed through the statistics tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Concurrent embedding cache.
///
/// Eviction is LRU with a hard maximum entry count; entries older than the
/// TTL are treated as absent and purged lazily on access.
pub struct EmbeddingCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(max_entries: usize, ttl_days: i64) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).expect("clamped to >= 1");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::days(ttl_days),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a vector. A hit promotes the entry atomically.
    pub fn get(&self, key: &CacheKey) -> Option<(Vec<f32>, bool)> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let expired = match entries.peek(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => Utc::now() - entry.created_at > self.ttl,
        };

        if expired {
            entries.pop(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // get() promotes to most-recently-used.
        let entry = entries.get(key)?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some((entry.vector.clone(), entry.is_fallback))
    }

    pub fn put(&self, key: CacheKey, vector: Vec<f32>, is_fallback: bool) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(
            key,
            CacheEntry {
                vector,
                is_fallback,
                created_at: Utc::now(),
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn put_with_age(&self, key: CacheKey, vector: Vec<f32>, age: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(
            key,
            CacheEntry {
                vector,
                is_fallback: false,
                created_at: Utc::now() - age,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_depends_on_model_and_content() {
        let a = cache_key("voyage-code-3", "hello");
        let b = cache_key("voyage-code-3", "hello");
        let c = cache_key("other-model", "hello");
        let d = cache_key("voyage-code-3", "world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = EmbeddingCache::new(10, 30);
        let key = cache_key("m", "text");

        assert!(cache.get(&key).is_none());
        cache.put(key, vec![1.0, 0.0], true);
        let (vector, is_fallback) = cache.get(&key).unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
        assert!(is_fallback);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = EmbeddingCache::new(2, 30);
        let k1 = cache_key("m", "one");
        let k2 = cache_key("m", "two");
        let k3 = cache_key("m", "three");

        cache.put(k1, vec![1.0], false);
        cache.put(k2, vec![2.0], false);
        // Touch k1 so k2 becomes the eviction candidate.
        cache.get(&k1);
        cache.put(k3, vec![3.0], false);

        assert!(cache.get(&k1).is_some());
        assert!(cache.get(&k2).is_none());
        assert!(cache.get(&k3).is_some());
    }

    #[test]
    fn test_ttl_expiry_is_a_miss_and_purges() {
        let cache = EmbeddingCache::new(10, 30);
        let key = cache_key("m", "stale");
        cache.put_with_age(key, vec![1.0], Duration::days(31));

        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().entries, 0);
    }
}
