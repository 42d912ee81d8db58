//! In-process feature cache with LRU eviction and TTL expiry.

use crate::table::FeatureTable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cache statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_seconds: u64,
    pub hit_ratio: f64,
}

struct CacheEntry {
    table: FeatureTable,
    last_access: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Bounded in-memory cache of feature tables.
///
/// Keys are `"{group}:{name}"`. Entries are evicted when the cache is full
/// (least recently accessed first) or when their TTL since last access has
/// elapsed. Both policies are checked independently on every read.
///
/// Operations never fail; the cache is always rebuildable from storage.
pub struct FeatureCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
    ttl: Duration,
}

impl FeatureCache {
    pub fn new(max_size: usize, ttl_seconds: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            max_size: max_size.max(1),
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    /// Canonical cache key for a feature.
    pub fn key(group: &str, name: &str) -> String {
        format!("{group}:{name}")
    }

    /// Look up a table, refreshing its recency. Expired entries are removed
    /// and reported as absent.
    pub fn get(&self, key: &str) -> Option<FeatureTable> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        match inner.entries.get_mut(key) {
            Some(entry) if entry.last_access.elapsed() < self.ttl => {
                entry.last_access = Instant::now();
                inner.hits += 1;
                Some(entry.table.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite a table. Evicts the least recently accessed
    /// entry first when at capacity.
    pub fn put(&self, key: &str, table: FeatureTable) {
        let mut inner = self.lock();
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_size {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                table,
                last_access: Instant::now(),
            },
        );
    }

    /// Drop one entry if present.
    pub fn remove(&self, key: &str) {
        self.lock().entries.remove(key);
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let total = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            ttl_seconds: self.ttl.as_secs(),
            hit_ratio: inner.hits as f64 / total.max(1) as f64,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // A poisoned lock means a panic mid-operation; cached data is
        // disposable, so keep serving rather than propagate the panic.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}
