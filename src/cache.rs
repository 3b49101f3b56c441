//! # Result Cache Module
//!
//! This module provides a thread-safe, time-boxed and size-bounded cache for
//! lookup results. Reusing results keeps the rate-limited product database
//! and the model provider from seeing the same query twice within a day.

use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;

/// Cached value with the moment it was stored
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Cache occupancy snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub max_entries: usize,
    pub ttl_hours: f64,
}

/// Time-boxed memoization keyed by canonical query strings
///
/// # Expiry
///
/// An entry older than the TTL is a miss. Expired entries are not removed on
/// read; they are dropped by `purge_expired`, `clear`, overwriting, or LRU
/// eviction.
///
/// # Capacity
///
/// Holds at most `max_entries` entries. Inserting beyond that evicts the least
/// recently used entry.
///
/// # Thread Safety
///
/// Uses a `Mutex<LruCache<>>` internally. Concurrent `put` calls for the same
/// key resolve as last writer wins.
pub struct ResultCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    ttl: Duration,
    max_entries: NonZeroUsize,
}

impl<V: Clone> ResultCache<V> {
    /// Create a cache with the given TTL and capacity
    ///
    /// A capacity of zero is raised to one.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nutrition_lookup::cache::ResultCache;
    /// use std::time::Duration;
    ///
    /// let cache: ResultCache<String> = ResultCache::new(Duration::from_secs(3600), 100);
    /// cache.put("search:apple", "cached".to_string());
    /// assert_eq!(cache.get("search:apple").as_deref(), Some("cached"));
    /// ```
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(max_entries)),
            ttl,
            max_entries,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_entries)
    }

    /// Get a value if present and younger than the TTL
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key)?;
        if entry.stored_at.elapsed() < self.ttl {
            debug!(key = key, "Cache hit");
            Some(entry.value.clone())
        } else {
            debug!(key = key, "Cache entry expired");
            None
        }
    }

    /// Store a value, replacing any previous entry for the key
    pub fn put(&self, key: impl Into<String>, value: V) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
        };
        if let Some((evicted, _)) = entries.push(key.into(), entry) {
            debug!(key = %evicted, "Cache entry replaced or evicted");
        }
    }

    /// Remove every entry
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let count = entries.len();
        entries.clear();
        if count > 0 {
            debug!(count = count, "Cleared cache entries");
        }
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.stored_at.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    /// Count entries without modifying the cache
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let total = entries.len();
        let valid = entries
            .iter()
            .filter(|(_, entry)| entry.stored_at.elapsed() < self.ttl)
            .count();

        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
            max_entries: self.max_entries.get(),
            ttl_hours: self.ttl.as_secs_f64() / 3600.0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
