// =============================================================================
// Market Cache — bounded TTL cache for snapshots and analyzed opportunities
// =============================================================================
//
// One generic cache backs three concerns: the global market list (key
// "markets"), per-ticker book snapshots, and per-(ticker, time-bucket)
// opportunities. Entries expire by age; inserts at capacity evict the entry
// with the oldest `stored_at`.
//
// The cache has exactly one writer (the cycle scheduler), so there is no
// interior locking here.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::errors::EngineError;

/// A cached value plus the instant it was stored.
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
}

/// Bounded TTL cache keyed by string.
#[derive(Debug)]
pub struct MarketCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
    ttl: Duration,
    max_size: usize,
}

impl<T: Clone> MarketCache<T> {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_size: max_size.max(1),
        }
    }

    /// Return the cached value iff the entry exists and has not expired.
    pub fn get(&self, key: &str) -> Option<T> {
        self.get_at(key, Instant::now())
    }

    /// Insert `value` under `key`, evicting the oldest entry when full.
    ///
    /// Fails with a validation error on an empty key.
    pub fn put(&mut self, key: &str, value: T) -> Result<(), EngineError> {
        self.put_at(key, value, Instant::now())
    }

    /// Remove a single entry.
    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // -------------------------------------------------------------------------
    // Clock-injected internals (also used directly by tests)
    // -------------------------------------------------------------------------

    fn get_at(&self, key: &str, now: Instant) -> Option<T> {
        let entry = self.entries.get(key)?;
        if now.duration_since(entry.stored_at) > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    fn put_at(&mut self, key: &str, value: T, now: Instant) -> Result<(), EngineError> {
        if key.is_empty() {
            return Err(EngineError::Validation(
                "cache key must be non-empty".to_string(),
            ));
        }

        // Replacing an existing key refreshes it in place; eviction only
        // applies when a new key would push the cache past capacity.
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_size {
            self.evict_oldest();
        }

        self.entries
            .insert(key.to_string(), CacheEntry { value, stored_at: now });
        Ok(())
    }

    /// Evict the entry with the oldest `stored_at`; key order breaks exact
    /// ties deterministically.
    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by(|(ka, ea), (kb, eb)| ea.stored_at.cmp(&eb.stored_at).then(ka.cmp(kb)))
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_secs: u64, max_size: usize) -> MarketCache<u32> {
        MarketCache::new(Duration::from_secs(ttl_secs), max_size)
    }

    #[test]
    fn get_returns_fresh_entries_only() {
        let mut c = cache(60, 10);
        let t0 = Instant::now();
        c.put_at("a", 1, t0).unwrap();

        assert_eq!(c.get_at("a", t0), Some(1));
        assert_eq!(c.get_at("a", t0 + Duration::from_secs(60)), Some(1));
        // Strictly past the TTL the entry is treated as absent.
        assert_eq!(c.get_at("a", t0 + Duration::from_secs(61)), None);
        assert_eq!(c.get_at("missing", t0), None);
    }

    #[test]
    fn size_never_exceeds_max() {
        let mut c = cache(60, 5);
        let t0 = Instant::now();
        for i in 0..50u32 {
            c.put_at(&format!("k{i}"), i, t0 + Duration::from_millis(i as u64))
                .unwrap();
            assert!(c.len() <= 5);
        }
        assert_eq!(c.len(), 5);
    }

    #[test]
    fn eviction_removes_the_oldest_entry_first() {
        let mut c = cache(600, 3);
        let t0 = Instant::now();
        c.put_at("old", 0, t0).unwrap();
        c.put_at("mid", 1, t0 + Duration::from_secs(1)).unwrap();
        c.put_at("new", 2, t0 + Duration::from_secs(2)).unwrap();

        // Inserting a fourth entry must evict "old", not the newer ones.
        c.put_at("newest", 3, t0 + Duration::from_secs(3)).unwrap();
        assert_eq!(c.get_at("old", t0 + Duration::from_secs(3)), None);
        assert_eq!(c.get_at("mid", t0 + Duration::from_secs(3)), Some(1));
        assert_eq!(c.get_at("new", t0 + Duration::from_secs(3)), Some(2));
        assert_eq!(c.get_at("newest", t0 + Duration::from_secs(3)), Some(3));
    }

    #[test]
    fn replacing_a_key_does_not_evict_others() {
        let mut c = cache(600, 2);
        let t0 = Instant::now();
        c.put_at("a", 1, t0).unwrap();
        c.put_at("b", 2, t0 + Duration::from_secs(1)).unwrap();
        // Refresh "a" at capacity: both keys must survive.
        c.put_at("a", 10, t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.get_at("a", t0 + Duration::from_secs(2)), Some(10));
        assert_eq!(c.get_at("b", t0 + Duration::from_secs(2)), Some(2));
    }

    #[test]
    fn empty_key_is_rejected() {
        let mut c = cache(60, 10);
        let err = c.put("", 1).unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }

    #[test]
    fn invalidate_and_clear() {
        let mut c = cache(60, 10);
        c.put("a", 1).unwrap();
        c.put("b", 2).unwrap();
        c.invalidate("a");
        assert_eq!(c.get("a"), None);
        assert_eq!(c.get("b"), Some(2));
        c.clear();
        assert!(c.is_empty());
    }
}
