//! Composes the three cache tiers in front of the durable store (§3/§4.1):
//! a hot in-process cache, an optional warm remote-KV cache, and the cold
//! durable backend. Reads check hot, then warm, then durable, warming
//! every tier above the one that actually served the read. Writes go
//! through the durable store first (it is the only tier whose failure is
//! fatal), then warm both caches — a warm-tier write failure is logged and
//! swallowed, matching §4.1's "cache errors never fail the request".

use async_trait::async_trait;
use tracing::warn;

use crate::domain_types::ConversationId;
use crate::state::ChatMessage;

use super::context::{ConversationContext, ConversationContextDelta};
use super::hot_cache::HotContextCache;
use super::{ContextStore, ContextStoreError};

#[cfg(feature = "redis-cache")]
use super::redis_cache::RedisContextCache;

/// A `ContextStore` layering a hot in-process cache and an optional warm
/// remote cache in front of a durable backend.
pub struct TieredContextStore<D: ContextStore> {
    hot: HotContextCache,
    #[cfg(feature = "redis-cache")]
    warm: Option<RedisContextCache>,
    durable: D,
}

impl<D: ContextStore> TieredContextStore<D> {
    /// Wraps `durable` with a hot cache and no warm tier.
    #[must_use]
    pub fn new(hot: HotContextCache, durable: D) -> Self {
        Self {
            hot,
            #[cfg(feature = "redis-cache")]
            warm: None,
            durable,
        }
    }

    /// Adds a warm Redis-backed tier between the hot cache and the durable
    /// backend. Absent a call to this, the store degrades to a two-tier
    /// hot/durable composition, matching §9's "if no remote KV is
    /// configured the tier is simply absent" note.
    #[cfg(feature = "redis-cache")]
    #[must_use]
    pub fn with_warm_cache(mut self, warm: RedisContextCache) -> Self {
        self.warm = Some(warm);
        self
    }

    #[cfg(feature = "redis-cache")]
    async fn warm_get(&self, conversation_id: ConversationId) -> Option<ConversationContext> {
        let warm = self.warm.as_ref()?;
        match warm.get(conversation_id).await {
            Ok(found) => found,
            Err(error) => {
                warn!(%conversation_id, %error, "warm cache read failed, falling through to durable store");
                None
            }
        }
    }

    #[cfg(feature = "redis-cache")]
    async fn warm_put(&self, context: &ConversationContext) {
        if let Some(warm) = &self.warm {
            if let Err(error) = warm.put(context).await {
                warn!(conversation_id = %context.conversation_id, %error, "warm cache write failed");
            }
        }
    }

    #[cfg(feature = "redis-cache")]
    async fn warm_invalidate(&self, conversation_id: ConversationId) {
        if let Some(warm) = &self.warm {
            if let Err(error) = warm.invalidate(conversation_id).await {
                warn!(%conversation_id, %error, "warm cache invalidation failed");
            }
        }
    }

    #[cfg(not(feature = "redis-cache"))]
    #[allow(clippy::unused_async)]
    async fn warm_get(&self, _conversation_id: ConversationId) -> Option<ConversationContext> {
        None
    }

    #[cfg(not(feature = "redis-cache"))]
    #[allow(clippy::unused_async)]
    async fn warm_put(&self, _context: &ConversationContext) {}

    #[cfg(not(feature = "redis-cache"))]
    #[allow(clippy::unused_async)]
    async fn warm_invalidate(&self, _conversation_id: ConversationId) {}
}

#[async_trait]
impl<D: ContextStore> ContextStore for TieredContextStore<D> {
    async fn get(&self, conversation_id: ConversationId) -> Result<Option<ConversationContext>, ContextStoreError> {
        if let Some(cached) = self.hot.get(conversation_id) {
            return Ok(Some(cached));
        }

        if let Some(warm) = self.warm_get(conversation_id).await {
            self.hot.put(warm.clone());
            return Ok(Some(warm));
        }

        let loaded = self.durable.get(conversation_id).await?;
        if let Some(context) = &loaded {
            self.hot.put(context.clone());
            self.warm_put(context).await;
        }
        Ok(loaded)
    }

    async fn apply(
        &self,
        conversation_id: ConversationId,
        delta: ConversationContextDelta,
    ) -> Result<ConversationContext, ContextStoreError> {
        let updated = self.durable.apply(conversation_id, delta).await?;
        self.hot.put(updated.clone());
        self.warm_put(&updated).await;
        Ok(updated)
    }

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        message: &ChatMessage,
    ) -> Result<(), ContextStoreError> {
        if let Err(error) = self.durable.append_message(conversation_id, message).await {
            warn!(%conversation_id, %error, "failed to persist conversation message");
            return Err(error);
        }
        Ok(())
    }

    async fn load_messages(&self, conversation_id: ConversationId) -> Result<Vec<ChatMessage>, ContextStoreError> {
        self.durable.load_messages(conversation_id).await
    }

    async fn clear_context(&self, conversation_id: ConversationId) -> Result<(), ContextStoreError> {
        self.durable.clear_context(conversation_id).await?;
        self.hot.remove(conversation_id);
        self.warm_invalidate(conversation_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteContextStore;
    use std::time::Duration;

    #[tokio::test]
    async fn a_fresh_read_populates_the_cache() {
        let durable = SqliteContextStore::connect("sqlite::memory:").await.unwrap();
        let conversation_id = durable
            .apply(ConversationId::generate(), ConversationContextDelta::default())
            .await
            .unwrap()
            .conversation_id;

        let tiered = TieredContextStore::new(HotContextCache::new(Duration::from_secs(60)), durable);
        let first = tiered.get(conversation_id).await.unwrap();
        assert!(first.is_some());
        let second = tiered.get(conversation_id).await.unwrap();
        assert_eq!(first.unwrap().conversation_id, second.unwrap().conversation_id);
    }
}
