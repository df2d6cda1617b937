//! In-process warm cache tier, modeled on the registry's `DashMap`-backed
//! lookup pattern: O(1) concurrent reads with a TTL checked on access rather
//! than a background sweep.

use std::time::Duration;

use dashmap::DashMap;

use crate::domain_types::{ConversationId, Timestamp};

use super::ConversationContext;

struct Entry {
    context: ConversationContext,
    cached_at: Timestamp,
}

/// A bounded-staleness in-memory cache of conversation contexts, sitting in
/// front of the durable store so a busy conversation's context doesn't hit
/// SQLite on every turn.
pub struct HotContextCache {
    entries: DashMap<ConversationId, Entry>,
    ttl: Duration,
}

impl HotContextCache {
    /// Builds an empty cache with the given time-to-live.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached context if present and not yet expired.
    #[must_use]
    pub fn get(&self, conversation_id: ConversationId) -> Option<ConversationContext> {
        let entry = self.entries.get(&conversation_id)?;
        if entry.cached_at.elapsed().is_none_or(|elapsed| elapsed > self.ttl) {
            drop(entry);
            self.entries.remove(&conversation_id);
            return None;
        }
        Some(entry.context.clone())
    }

    /// Inserts or overwrites the cached context, resetting its TTL.
    pub fn put(&self, context: ConversationContext) {
        let conversation_id = context.conversation_id;
        self.entries.insert(
            conversation_id,
            Entry {
                context,
                cached_at: Timestamp::now(),
            },
        );
    }

    /// Removes a single entry immediately, regardless of its TTL.
    pub fn remove(&self, conversation_id: ConversationId) {
        self.entries.remove(&conversation_id);
    }

    /// Evicts all expired entries; callers may run this periodically to
    /// bound memory use instead of relying solely on access-time checks.
    pub fn evict_expired(&self) {
        self.entries
            .retain(|_, entry| entry.cached_at.elapsed().is_some_and(|elapsed| elapsed <= self.ttl));
    }

    /// Number of entries currently cached, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::OrganizationId;
    use std::thread::sleep;

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = HotContextCache::new(Duration::from_millis(10));
        let context = ConversationContext::new(ConversationId::generate(), OrganizationId::generate(), None);
        let id = context.conversation_id;
        cache.put(context);
        assert!(cache.get(id).is_some());
        sleep(Duration::from_millis(20));
        assert!(cache.get(id).is_none());
        assert!(cache.is_empty());
    }
}
