use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(feature = "graphql")]
use async_graphql::SimpleObject;

/// Configuration for the response cache
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached responses
    pub max_entries: usize,
    /// Whether caching is enabled
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            enabled: true,
        }
    }
}

/// Cached response body with the time it was stored
#[derive(Clone, Debug)]
pub struct CachedResult {
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl CachedResult {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            created_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct Entries {
    by_url: HashMap<String, CachedResult>,
    // Insertion order, oldest first
    order: VecDeque<String>,
}

/// Bounded in-memory cache of GET responses keyed by URL.
///
/// Entries never expire. When full, the oldest inserted entry is evicted,
/// regardless of how recently it was read.
pub struct ResponseCache {
    entries: Mutex<Entries>,
    pub config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            config,
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        // Entries stay consistent even if a holder panicked
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get the cached response for `url`
    pub fn get(&self, url: &str) -> Option<Value> {
        if !self.config.enabled {
            return None;
        }

        match self.entries().by_url.get(url) {
            Some(cached) => {
                log::debug!("Cache hit for url: {}", url);
                Some(cached.data.clone())
            }
            None => {
                log::debug!("Cache miss for url: {}", url);
                None
            }
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries().by_url.contains_key(url)
    }

    /// Store a response, evicting the oldest entry when at capacity
    pub fn set(&self, url: impl Into<String>, data: Value) {
        if !self.config.enabled || self.config.max_entries == 0 {
            return;
        }

        let url = url.into();
        let mut entries = self.entries();

        // Overwrites keep their original position
        if let Some(cached) = entries.by_url.get_mut(&url) {
            *cached = CachedResult::new(data);
            log::debug!("Replaced cached response for url: {}", url);
            return;
        }

        if entries.by_url.len() >= self.config.max_entries {
            if let Some(oldest) = entries.order.pop_front() {
                entries.by_url.remove(&oldest);
                log::debug!("Evicted oldest cached response: {}", oldest);
            }
        }

        entries.order.push_back(url.clone());
        entries.by_url.insert(url.clone(), CachedResult::new(data));
        log::debug!("Stored in cache with url: {}", url);
    }

    /// Remove a single entry, returning whether it existed
    pub fn delete(&self, url: &str) -> bool {
        let mut entries = self.entries();
        let removed = entries.by_url.remove(url).is_some();
        if removed {
            entries.order.retain(|key| key != url);
            log::debug!("Removed cached response for url: {}", url);
        }
        removed
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        let mut entries = self.entries();
        entries.by_url.clear();
        entries.order.clear();
        log::info!("Response cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries().by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached URLs, oldest first
    pub fn keys(&self) -> Vec<String> {
        self.entries().order.iter().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries();
        CacheStats {
            total_entries: entries.by_url.len(),
            max_entries: self.config.max_entries,
            oldest_entry_at: entries.by_url.values().map(|cached| cached.created_at).min(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "graphql", derive(SimpleObject))]
pub struct CacheStats {
    pub total_entries: usize,
    pub max_entries: usize,
    /// When the least recently stored response was written
    pub oldest_entry_at: Option<DateTime<Utc>>,
}

/// Thread-safe wrapper for the cache
pub type SharedResponseCache = Arc<ResponseCache>;
