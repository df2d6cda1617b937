//! LRU-with-TTL cache for intent results (C2).
//!
//! Keyed on a hash of the normalized utterance plus the slice of context
//! that can change which intent a repeat of the same message resolves to
//! (language, customer tier, previous agent). `IndexMap` gives us ordered
//! iteration so move-to-MRU and evict-LRU are both O(1) amortized, which a
//! plain `HashMap` can't do without a side list.

use std::sync::Mutex;
use std::time::Duration;

use indexmap::IndexMap;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::domain_types::Timestamp;

use super::IntentResult;

/// Context fields relevant to cache-key derivation; a message cached under
/// one combination of these must not be served for a different one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheKeyContext<'a> {
    /// BCP-47-ish language code.
    pub language: &'a str,
    /// Customer tier, affecting which agents are reachable.
    pub user_tier: &'a str,
    /// The agent that owned the previous turn, if any.
    pub previous_agent: Option<&'a str>,
}

/// Opaque cache key: the MD5 hex digest of the normalized message and the
/// sorted JSON encoding of the relevant context fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey([u8; 16]);

impl CacheKey {
    /// Derives a key from `message` and `context`, matching the source
    /// system's `lowercase(trim(message)) | json_sorted(relevant_context)`
    /// scheme.
    #[must_use]
    pub fn derive(message: &str, context: &CacheKeyContext<'_>) -> Self {
        let normalized = message.trim().to_lowercase();
        let context_json = serde_json::to_string(context).unwrap_or_default();
        let mut hasher = Md5::new();
        hasher.update(normalized.as_bytes());
        hasher.update(b"|");
        hasher.update(context_json.as_bytes());
        Self(hasher.finalize().into())
    }
}

struct Entry {
    result: IntentResult,
    inserted_at: Timestamp,
}

struct Inner {
    entries: IndexMap<CacheKey, Entry>,
    max_size: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

/// Bounded LRU cache of `IntentResult`s with TTL-based expiry, guarding its
/// single `IndexMap` under a mutex so a get's move-to-MRU and a concurrent
/// set's eviction never interleave (the source system's "single critical
/// section" requirement from the concurrency model).
pub struct IntentCache {
    inner: Mutex<Inner>,
}

/// Point-in-time snapshot of cache performance, mirroring `get_cache_stats`.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Entries currently held, expired or not.
    pub size: usize,
    /// Configured maximum size.
    pub max_size: usize,
    /// Total hits since construction.
    pub hits: u64,
    /// Total misses since construction.
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate in `[0.0, 1.0]`, `0.0` if there have been no requests yet.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl IntentCache {
    /// Builds an empty cache bounded at `max_size` entries with the given
    /// per-entry TTL.
    #[must_use]
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: IndexMap::new(),
                max_size,
                ttl,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Returns the cached result for `key`, or `None` on a miss or expired
    /// entry. A hit moves the entry to most-recently-used.
    #[must_use]
    pub fn get(&self, key: CacheKey) -> Option<IntentResult> {
        let mut inner = self.inner.lock().expect("intent cache mutex poisoned");
        let Some(entry) = inner.entries.get(&key) else {
            inner.misses += 1;
            return None;
        };
        if entry.inserted_at.elapsed().is_none_or(|elapsed| elapsed > inner.ttl) {
            inner.entries.shift_remove(&key);
            inner.misses += 1;
            return None;
        }
        let (_, entry) = inner.entries.shift_remove_entry(&key).expect("just checked present");
        let result = entry.result.clone();
        inner.entries.insert(key, entry);
        inner.hits += 1;
        Some(result)
    }

    /// Stores `result` under `key`, evicting the least-recently-used entry
    /// first if the cache is at capacity. Restarts the TTL for `key`.
    pub fn set(&self, key: CacheKey, result: IntentResult) {
        let mut inner = self.inner.lock().expect("intent cache mutex poisoned");
        inner.entries.shift_remove(&key);
        if inner.entries.len() >= inner.max_size {
            inner.entries.shift_remove_index(0);
        }
        inner.entries.insert(
            key,
            Entry {
                result,
                inserted_at: Timestamp::now(),
            },
        );
    }

    /// Drops every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().expect("intent cache mutex poisoned");
        let count = inner.entries.len();
        inner.entries.clear();
        count
    }

    /// Current hit/miss counters and occupancy.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("intent cache mutex poisoned");
        CacheStats {
            size: inner.entries.len(),
            max_size: inner.max_size,
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}
