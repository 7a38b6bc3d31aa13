/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Diagnosis Cache Module
//!
//! TTL-expiring, size-bounded cache of diagnosis summaries keyed by
//! `<namespace>/<pod>`. Eviction is approximate LRU via insertion
//! order (FIFO): `get` never touches recency, which keeps the cache
//! cheap under concurrent access; the periodic TTL sweep dominates in
//! steady state anyway.

use heimdall_models::models::health::CacheStats;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: String,
    inserted_at: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    insertion_order: VecDeque<String>,
}

/// Shared diagnosis cache; safe under concurrent get/put/sweep.
pub struct DiagnosisCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    lookups: AtomicU64,
}

impl DiagnosisCache {
    pub fn new(ttl_ms: u64, max_entries: usize) -> Self {
        DiagnosisCache {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
            ttl: Duration::from_millis(ttl_ms),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
        }
    }

    /// Looks up a key. An entry older than the TTL is deleted and the
    /// lookup misses. Hits do not update recency.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        match inner.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => {}
            None => return None,
        }
        // Expired: delete and miss.
        inner.entries.remove(key);
        inner.insertion_order.retain(|k| k != key);
        None
    }

    /// Inserts a value, evicting the oldest-inserted entry when the
    /// cache is at capacity.
    pub fn put(&self, key: &str, value: String) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        if inner.entries.contains_key(key) {
            inner.insertion_order.retain(|k| k != key);
        }
        while inner.entries.len() >= self.max_entries {
            match inner.insertion_order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
        inner.insertion_order.push_back(key.to_string());
    }

    /// Removes every expired entry; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let ttl = self.ttl;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
        let removed = before - inner.entries.len();
        if removed > 0 {
            let live: Vec<String> = inner.entries.keys().cloned().collect();
            inner.insertion_order.retain(|k| live.contains(k));
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.clear();
        inner.insertion_order.clear();
    }

    /// Hits divided by lookups since start; 0 when nothing was looked
    /// up yet.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.lookups.load(Ordering::Relaxed);
        if lookups == 0 {
            return 0.0;
        }
        self.hits.load(Ordering::Relaxed) as f64 / lookups as f64
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            max_entries: self.max_entries,
            hit_rate: self.hit_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_then_get_within_ttl() {
        let cache = DiagnosisCache::new(60_000, 10);
        cache.put("prod/api-1", "diagnosis".to_string());
        assert_eq!(cache.get("prod/api-1").as_deref(), Some("diagnosis"));
    }

    #[test]
    fn test_get_missing_key() {
        let cache = DiagnosisCache::new(60_000, 10);
        assert!(cache.get("prod/absent").is_none());
    }

    #[test]
    fn test_expired_entry_is_deleted_on_get() {
        let cache = DiagnosisCache::new(10, 10);
        cache.put("prod/api-1", "stale".to_string());
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get("prod/api-1").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let cache = DiagnosisCache::new(60_000, 3);
        for i in 0..10 {
            cache.put(&format!("ns/pod-{}", i), format!("v{}", i));
            assert!(cache.len() <= 3, "cache grew past capacity at step {}", i);
        }
        // Oldest-inserted entries were evicted first.
        assert!(cache.get("ns/pod-0").is_none());
        assert!(cache.get("ns/pod-9").is_some());
    }

    #[test]
    fn test_reinsert_moves_key_to_back_of_eviction_order() {
        let cache = DiagnosisCache::new(60_000, 2);
        cache.put("ns/a", "1".to_string());
        cache.put("ns/b", "2".to_string());
        cache.put("ns/a", "3".to_string());
        cache.put("ns/c", "4".to_string());
        // "b" was the oldest insertion after "a" was re-put.
        assert!(cache.get("ns/b").is_none());
        assert_eq!(cache.get("ns/a").as_deref(), Some("3"));
        assert_eq!(cache.get("ns/c").as_deref(), Some("4"));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = DiagnosisCache::new(50, 10);
        cache.put("ns/old", "x".to_string());
        std::thread::sleep(Duration::from_millis(70));
        cache.put("ns/new", "y".to_string());
        let removed = cache.sweep();
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("ns/new").is_some());
    }

    #[test]
    fn test_hit_rate_is_exact() {
        let cache = DiagnosisCache::new(60_000, 10);
        assert_eq!(cache.hit_rate(), 0.0);
        cache.put("ns/a", "v".to_string());
        cache.get("ns/a"); // hit
        cache.get("ns/b"); // miss
        assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.max_entries, 10);
    }

    #[test]
    fn test_clear_empties_the_cache() {
        let cache = DiagnosisCache::new(60_000, 10);
        cache.put("ns/a", "v".to_string());
        cache.put("ns/b", "v".to_string());
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("ns/a").is_none());
    }

    #[test]
    fn test_concurrent_access() {
        let cache = std::sync::Arc::new(DiagnosisCache::new(60_000, 50));
        let mut handles = vec![];
        for t in 0..4 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("ns/pod-{}-{}", t, i % 20);
                    cache.put(&key, format!("v{}", i));
                    cache.get(&key);
                    if i % 50 == 0 {
                        cache.sweep();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 50);
    }
}
