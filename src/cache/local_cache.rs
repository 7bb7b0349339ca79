use crate::protocol::RespValue;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedReply {
    key: Option<String>,
    reply: RespValue,
    expires_at: Instant,
}

impl CachedReply {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Inserts between two sweeps of expired entries.
const SWEEP_INTERVAL: usize = 1024;

/// Client-side cache of read replies.
///
/// Entries are keyed by the encoded command and expire lazily on access or
/// during the sweep run every [`SWEEP_INTERVAL`] inserts. An index from data
/// key to cache keys lets a write drop exactly the entries read from it.
pub struct ClientCache {
    entries: DashMap<String, CachedReply>,
    by_key: DashMap<String, HashSet<String>>,
    inserts: AtomicUsize,
}

impl Default for ClientCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            by_key: DashMap::new(),
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, cache_key: &str) -> Option<RespValue> {
        let entry = self.entries.get(cache_key)?;
        if entry.is_expired() {
            drop(entry);
            self.remove_expired(cache_key);
            None
        } else {
            Some(entry.reply.clone())
        }
    }

    pub fn insert(&self, cache_key: String, key: Option<&str>, reply: RespValue, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let entry = CachedReply {
            key: key.map(str::to_string),
            reply,
            expires_at: Instant::now() + ttl,
        };
        if let Some(previous) = self.entries.insert(cache_key.clone(), entry) {
            if let Some(old_key) = previous.key {
                self.unindex(&old_key, &cache_key);
            }
        }
        if let Some(key) = key {
            self.by_key
                .entry(key.to_string())
                .or_default()
                .insert(cache_key);
        }

        if (self.inserts.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            self.purge_expired();
        }
    }

    /// Drop every entry read from `key`.
    pub fn invalidate_key(&self, key: &str) {
        if let Some((_, cache_keys)) = self.by_key.remove(key) {
            for cache_key in cache_keys {
                self.entries.remove(&cache_key);
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired())
            .map(|entry| entry.key().clone())
            .collect();
        expired
            .iter()
            .filter(|cache_key| self.remove_expired(cache_key))
            .count()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.by_key.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of data keys with at least one cached entry.
    pub fn indexed_keys(&self) -> usize {
        self.by_key.len()
    }

    fn remove_expired(&self, cache_key: &str) -> bool {
        match self.entries.remove_if(cache_key, |_, entry| entry.is_expired()) {
            Some((cache_key, entry)) => {
                if let Some(key) = entry.key {
                    self.unindex(&key, &cache_key);
                }
                true
            }
            None => false,
        }
    }

    fn unindex(&self, key: &str, cache_key: &str) {
        if let Some(mut cache_keys) = self.by_key.get_mut(key) {
            cache_keys.remove(cache_key);
        }
        self.by_key.remove_if(key, |_, cache_keys| cache_keys.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> RespValue {
        RespValue::BulkString(Some(s.to_string()))
    }

    #[test]
    fn test_get_and_insert() {
        let cache = ClientCache::new();
        cache.insert("GET\u{1f}a".to_string(), Some("a"), bulk("1"), Duration::from_secs(60));

        assert_eq!(cache.get("GET\u{1f}a"), Some(bulk("1")));
        assert_eq!(cache.get("GET\u{1f}b"), None);
    }

    #[test]
    fn test_expiry() {
        let cache = ClientCache::new();
        cache.insert("k".to_string(), Some("k"), bulk("v"), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_is_not_stored() {
        let cache = ClientCache::new();
        cache.insert("k".to_string(), Some("k"), bulk("v"), Duration::ZERO);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_key() {
        let cache = ClientCache::new();
        let ttl = Duration::from_secs(60);
        cache.insert("GET\u{1f}a".to_string(), Some("a"), bulk("1"), ttl);
        cache.insert("STRLEN\u{1f}a".to_string(), Some("a"), RespValue::Integer(1), ttl);
        cache.insert("GET\u{1f}b".to_string(), Some("b"), bulk("2"), ttl);

        cache.invalidate_key("a");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.indexed_keys(), 1);
        assert_eq!(cache.get("GET\u{1f}b"), Some(bulk("2")));
    }

    #[test]
    fn test_purge_drops_entries_never_read_again() {
        let cache = ClientCache::new();
        cache.insert("GET\u{1f}a".to_string(), Some("a"), bulk("1"), Duration::from_millis(10));
        cache.insert("GET\u{1f}b".to_string(), Some("b"), bulk("2"), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.indexed_keys(), 1);
    }

    #[test]
    fn test_inserts_sweep_expired_entries() {
        let cache = ClientCache::new();
        cache.insert("GET\u{1f}old".to_string(), Some("old"), bulk("1"), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));

        for i in 1..SWEEP_INTERVAL {
            let key = format!("k{}", i);
            cache.insert(format!("GET\u{1f}{}", key), Some(&key), bulk("v"), Duration::from_secs(60));
        }

        assert_eq!(cache.len(), SWEEP_INTERVAL - 1);
        assert_eq!(cache.get("GET\u{1f}old"), None);
    }

    #[test]
    fn test_overwrite_moves_index() {
        let cache = ClientCache::new();
        let ttl = Duration::from_secs(60);
        cache.insert("MGET\u{1f}a".to_string(), Some("a"), bulk("1"), ttl);
        cache.insert("MGET\u{1f}a".to_string(), Some("b"), bulk("2"), ttl);

        cache.invalidate_key("a");
        assert_eq!(cache.get("MGET\u{1f}a"), Some(bulk("2")));

        cache.invalidate_key("b");
        assert!(cache.is_empty());
        assert_eq!(cache.indexed_keys(), 0);
    }
}
