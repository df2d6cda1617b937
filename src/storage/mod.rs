//! The context store (C1): durable conversation context behind a warm
//! in-memory cache.
//!
//! Follows the functional core / imperative shell split the rest of the
//! crate uses: pure row <-> domain mapping lives in `sqlite::sql`, I/O lives
//! in the store implementations.

pub mod context;
pub mod hot_cache;
pub mod sqlite;
pub mod tiered;

#[cfg(feature = "redis-cache")]
pub mod redis_cache;

pub use context::{ConversationContext, ConversationContextDelta};
pub use hot_cache::HotContextCache;
pub use sqlite::SqliteContextStore;
pub use tiered::TieredContextStore;

#[cfg(feature = "redis-cache")]
pub use redis_cache::RedisContextCache;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain_types::ConversationId;

/// Failure reading or writing conversation context.
#[derive(Debug, Error)]
pub enum ContextStoreError {
    /// The durable backend rejected the query.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored JSON column could not be decoded.
    #[error("corrupt stored context: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cache backend (e.g. Redis) could not be reached; callers fall
    /// back to the durable store rather than treating this as fatal.
    #[error("cache backend unavailable: {0}")]
    CacheUnavailable(String),
}

/// Persistent, tenant-scoped conversation context: the rolling summary and
/// turn-tracking fields injected into every worker's prompt.
///
/// Implementations are free to layer caches in front of a durable store, but
/// must always read-through on a miss and write-through on every update —
/// losing a summary update silently would desync the next turn's context
/// injection from what was actually said.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Loads the context for `conversation_id`, or `None` if this is the
    /// conversation's first turn.
    async fn get(&self, conversation_id: ConversationId) -> Result<Option<ConversationContext>, ContextStoreError>;

    /// Creates or updates the context row, applying `delta` to whatever
    /// currently exists (or to a fresh context, for a first turn).
    async fn apply(
        &self,
        conversation_id: ConversationId,
        delta: ConversationContextDelta,
    ) -> Result<ConversationContext, ContextStoreError>;

    /// Appends one message to the conversation's durable transcript.
    async fn append_message(
        &self,
        conversation_id: ConversationId,
        message: &crate::state::ChatMessage,
    ) -> Result<(), ContextStoreError>;

    /// Loads the durable transcript for `conversation_id`, oldest first.
    async fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<crate::state::ChatMessage>, ContextStoreError>;

    /// Atomically deletes the context row and all of its messages, across
    /// every tier. Used by the admin surface's "forget this conversation"
    /// operation; a partial delete (messages gone, context row surviving,
    /// or vice versa) would resurrect stale state on the next turn.
    async fn clear_context(&self, conversation_id: ConversationId) -> Result<(), ContextStoreError>;
}
