//! Optional Redis-backed warm cache tier, grounded in the source system's
//! async Redis repository: JSON-serialized values under a namespaced key,
//! with a TTL set on every write so a crashed orchestrator's stale state
//! self-heals rather than accumulating forever.

use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::domain_types::ConversationId;

use super::ContextStoreError;
use super::context::ConversationContext;

const KEY_PREFIX: &str = "conversation_context:";

fn key_for(conversation_id: ConversationId) -> String {
    format!("{KEY_PREFIX}{conversation_id}")
}

/// A Redis-backed cache of serialized conversation contexts. Not a
/// `ContextStore` on its own — it has no durable fallback and no message
/// log — so it is meant to sit inside a tiered store alongside a durable
/// backend, the same role `HotContextCache` plays for the in-process tier.
pub struct RedisContextCache {
    connection: ConnectionManager,
    ttl: Duration,
}

impl RedisContextCache {
    /// Connects to `redis_url` and prepares a connection manager that
    /// reconnects transparently on transient failures.
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, ContextStoreError> {
        let client =
            redis::Client::open(redis_url).map_err(|error| ContextStoreError::CacheUnavailable(error.to_string()))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|error| ContextStoreError::CacheUnavailable(error.to_string()))?;
        Ok(Self { connection, ttl })
    }

    /// Reads and deserializes the cached context, if present and not
    /// expired. A cache-unreachable error is reported to the caller so a
    /// tiered store can fall back to durable storage rather than treat it
    /// as a hard failure.
    pub async fn get(&self, conversation_id: ConversationId) -> Result<Option<ConversationContext>, ContextStoreError> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection
            .get(key_for(conversation_id))
            .await
            .map_err(|error| ContextStoreError::CacheUnavailable(error.to_string()))?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Serializes and writes the context with this cache's TTL.
    pub async fn put(&self, context: &ConversationContext) -> Result<(), ContextStoreError> {
        let mut connection = self.connection.clone();
        let json = serde_json::to_string(context)?;
        connection
            .set_ex::<_, _, ()>(key_for(context.conversation_id), json, self.ttl.as_secs())
            .await
            .map_err(|error| ContextStoreError::CacheUnavailable(error.to_string()))?;
        Ok(())
    }

    /// Drops the cached entry, e.g. after a durable delete.
    pub async fn invalidate(&self, conversation_id: ConversationId) -> Result<(), ContextStoreError> {
        let mut connection = self.connection.clone();
        connection
            .del::<_, ()>(key_for(conversation_id))
            .await
            .map_err(|error| ContextStoreError::CacheUnavailable(error.to_string()))?;
        Ok(())
    }
}
