//! Durable `SQLite` backing for the context store.
//!
//! Functional core / imperative shell split: `row` holds pure mapping
//! between `ConversationContext` and the flattened row shape `sqlx` can
//! bind, the `SqliteContextStore` methods are the imperative shell.

use async_trait::async_trait;
use sqlx::{SqlitePool, migrate::Migrator};
use tracing::instrument;

use crate::domain_types::{AgentKey, ConversationId, OrganizationId, Timestamp};
use crate::state::{ChatMessage, Sender};

use super::context::{ConversationContext, ConversationContextDelta};
use super::{ContextStore, ContextStoreError};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

mod row {
    use super::ConversationContext;
    use crate::domain_types::{AgentKey, ConversationId, OrganizationId, Timestamp};
    use std::time::{Duration, UNIX_EPOCH};

    /// Flattened representation of a `conversation_contexts` row.
    #[derive(sqlx::FromRow)]
    pub(super) struct ContextRow {
        pub conversation_id: String,
        pub organization_id: String,
        pub user_phone: Option<String>,
        pub rolling_summary: String,
        pub topic_history: String,
        pub key_entities: String,
        pub total_turns: i64,
        pub last_user_message: Option<String>,
        pub last_bot_response: Option<String>,
        pub last_agent: Option<String>,
        pub metadata: String,
        pub created_at: String,
        pub updated_at: String,
        pub last_activity_at: String,
    }

    pub(super) fn to_row(context: &ConversationContext) -> Result<ContextRow, serde_json::Error> {
        Ok(ContextRow {
            conversation_id: context.conversation_id.to_string(),
            organization_id: context.organization_id.to_string(),
            user_phone: context.user_phone.clone(),
            rolling_summary: context.rolling_summary.clone(),
            topic_history: serde_json::to_string(&context.topic_history)?,
            key_entities: serde_json::to_string(&context.key_entities)?,
            total_turns: i64::from(context.total_turns),
            last_user_message: context.last_user_message.clone(),
            last_bot_response: context.last_bot_response.clone(),
            last_agent: context.last_agent.as_ref().map(ToString::to_string),
            metadata: serde_json::to_string(&context.metadata)?,
            created_at: timestamp_to_rfc3339(context.created_at),
            updated_at: timestamp_to_rfc3339(context.updated_at),
            last_activity_at: timestamp_to_rfc3339(context.last_activity_at),
        })
    }

    pub(super) fn from_row(row: ContextRow) -> Result<ConversationContext, serde_json::Error> {
        Ok(ConversationContext {
            conversation_id: row
                .conversation_id
                .parse::<uuid::Uuid>()
                .map(ConversationId::new)
                .unwrap_or_else(|_| ConversationId::generate()),
            organization_id: row
                .organization_id
                .parse::<uuid::Uuid>()
                .map(OrganizationId::new)
                .unwrap_or_else(|_| OrganizationId::generate()),
            user_phone: row.user_phone,
            rolling_summary: row.rolling_summary,
            topic_history: serde_json::from_str(&row.topic_history)?,
            key_entities: serde_json::from_str(&row.key_entities)?,
            total_turns: u32::try_from(row.total_turns).unwrap_or(u32::MAX),
            last_user_message: row.last_user_message,
            last_bot_response: row.last_bot_response,
            last_agent: row.last_agent.and_then(|s| AgentKey::try_new(s).ok()),
            metadata: serde_json::from_str(&row.metadata)?,
            created_at: rfc3339_to_timestamp(&row.created_at),
            updated_at: rfc3339_to_timestamp(&row.updated_at),
            last_activity_at: rfc3339_to_timestamp(&row.last_activity_at),
        })
    }

    fn timestamp_to_rfc3339(timestamp: Timestamp) -> String {
        let secs = timestamp
            .as_system_time()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        secs.to_string()
    }

    fn rfc3339_to_timestamp(raw: &str) -> Timestamp {
        let secs: u64 = raw.parse().unwrap_or(0);
        Timestamp::new(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

mod sql {
    pub(super) const UPSERT_CONTEXT: &str = "
        INSERT INTO conversation_contexts (
            conversation_id, organization_id, user_phone, rolling_summary,
            topic_history, key_entities, total_turns, last_user_message,
            last_bot_response, last_agent, metadata, created_at, updated_at,
            last_activity_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (conversation_id) DO UPDATE SET
            organization_id = excluded.organization_id,
            user_phone = excluded.user_phone,
            rolling_summary = excluded.rolling_summary,
            topic_history = excluded.topic_history,
            key_entities = excluded.key_entities,
            total_turns = excluded.total_turns,
            last_user_message = excluded.last_user_message,
            last_bot_response = excluded.last_bot_response,
            last_agent = excluded.last_agent,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at,
            last_activity_at = excluded.last_activity_at
    ";

    pub(super) const SELECT_CONTEXT: &str = "
        SELECT conversation_id, organization_id, user_phone, rolling_summary,
               topic_history, key_entities, total_turns, last_user_message,
               last_bot_response, last_agent, metadata, created_at, updated_at,
               last_activity_at
        FROM conversation_contexts WHERE conversation_id = ?
    ";

    pub(super) const INSERT_MESSAGE: &str = "
        INSERT INTO conversation_messages (conversation_id, sender, content, agent_name, created_at)
        VALUES (?, ?, ?, ?, ?)
    ";

    pub(super) const SELECT_MESSAGES: &str = "
        SELECT sender, content, agent_name FROM conversation_messages
        WHERE conversation_id = ? ORDER BY id ASC
    ";

    pub(super) const DELETE_CONTEXT: &str = "
        DELETE FROM conversation_contexts WHERE conversation_id = ?
    ";

    pub(super) const DELETE_MESSAGES: &str = "
        DELETE FROM conversation_messages WHERE conversation_id = ?
    ";
}

/// `SQLite`-backed durable context store. Embeds and runs its own
/// migrations on construction.
pub struct SqliteContextStore {
    pool: SqlitePool,
}

impl SqliteContextStore {
    /// Connects to `database_url` and runs pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, ContextStoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        MIGRATOR.run(&pool).await.map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }

    /// Wraps an already-connected, already-migrated pool.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    #[instrument(skip(self))]
    async fn get(&self, conversation_id: ConversationId) -> Result<Option<ConversationContext>, ContextStoreError> {
        let Some(record) = sqlx::query_as::<_, row::ContextRow>(sql::SELECT_CONTEXT)
            .bind(conversation_id.to_string())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        Ok(Some(row::from_row(record)?))
    }

    #[instrument(skip(self, delta))]
    async fn apply(
        &self,
        conversation_id: ConversationId,
        delta: ConversationContextDelta,
    ) -> Result<ConversationContext, ContextStoreError> {
        let base = match self.get(conversation_id).await? {
            Some(existing) => existing,
            None => {
                let organization_id = delta.organization_id.unwrap_or_else(OrganizationId::generate);
                ConversationContext::new(conversation_id, organization_id, delta.user_phone.clone())
            }
        };
        let updated = base.apply(delta);
        let persisted = row::to_row(&updated)?;

        sqlx::query(sql::UPSERT_CONTEXT)
            .bind(persisted.conversation_id)
            .bind(persisted.organization_id)
            .bind(persisted.user_phone)
            .bind(persisted.rolling_summary)
            .bind(persisted.topic_history)
            .bind(persisted.key_entities)
            .bind(persisted.total_turns)
            .bind(persisted.last_user_message)
            .bind(persisted.last_bot_response)
            .bind(persisted.last_agent)
            .bind(persisted.metadata)
            .bind(persisted.created_at)
            .bind(persisted.updated_at)
            .bind(persisted.last_activity_at)
            .execute(&self.pool)
            .await?;

        Ok(updated)
    }

    #[instrument(skip(self, message))]
    async fn append_message(
        &self,
        conversation_id: ConversationId,
        message: &ChatMessage,
    ) -> Result<(), ContextStoreError> {
        let sender = match message.sender {
            Sender::User => "user",
            Sender::Assistant => "assistant",
            Sender::System => "system",
        };
        sqlx::query(sql::INSERT_MESSAGE)
            .bind(conversation_id.to_string())
            .bind(sender)
            .bind(&message.content)
            .bind(message.agent_name.as_ref().map(ToString::to_string))
            .bind(
                Timestamp::now()
                    .as_system_time()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs() as i64,
            )
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_messages(&self, conversation_id: ConversationId) -> Result<Vec<ChatMessage>, ContextStoreError> {
        let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(sql::SELECT_MESSAGES)
            .bind(conversation_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(sender, content, agent_name)| ChatMessage {
                sender: match sender.as_str() {
                    "assistant" => Sender::Assistant,
                    "system" => Sender::System,
                    _ => Sender::User,
                },
                content,
                agent_name: agent_name.and_then(|s| AgentKey::try_new(s).ok()),
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn clear_context(&self, conversation_id: ConversationId) -> Result<(), ContextStoreError> {
        // Deletes both rows explicitly inside one transaction rather than
        // relying on the schema's `ON DELETE CASCADE`, since SQLite only
        // enforces foreign keys when a connection has turned them on — this
        // way the atomicity invariant holds regardless of that setting.
        let mut tx = self.pool.begin().await?;
        sqlx::query(sql::DELETE_MESSAGES)
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query(sql::DELETE_CONTEXT)
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatMessage;

    async fn store() -> SqliteContextStore {
        SqliteContextStore::connect("sqlite::memory:").await.expect("in-memory db connects")
    }

    #[tokio::test]
    async fn round_trips_a_context_update() {
        let store = store().await;
        let conversation_id = ConversationId::generate();
        let delta = ConversationContextDelta {
            rolling_summary: Some("greeted the user".to_string()),
            exchange: Some(("hola".to_string(), "hola, bienvenido".to_string())),
            ..Default::default()
        };
        let saved = store.apply(conversation_id, delta).await.unwrap();
        assert_eq!(saved.total_turns, 1);

        let loaded = store.get(conversation_id).await.unwrap().unwrap();
        assert_eq!(loaded.rolling_summary, "greeted the user");
        assert_eq!(loaded.last_bot_response.as_deref(), Some("hola, bienvenido"));
    }

    #[tokio::test]
    async fn first_turn_seeds_the_real_tenant_and_phone() {
        let store = store().await;
        let conversation_id = ConversationId::generate();
        let organization_id = OrganizationId::generate();
        let delta = ConversationContextDelta {
            organization_id: Some(organization_id),
            user_phone: Some("5492641234567".to_string()),
            exchange: Some(("hola".to_string(), "hola, bienvenido".to_string())),
            ..Default::default()
        };
        let saved = store.apply(conversation_id, delta).await.unwrap();
        assert_eq!(saved.organization_id, organization_id);
        assert_eq!(saved.user_phone.as_deref(), Some("5492641234567"));

        let loaded = store.get(conversation_id).await.unwrap().unwrap();
        assert_eq!(loaded.organization_id, organization_id);
        assert_eq!(loaded.user_phone.as_deref(), Some("5492641234567"));
    }

    #[tokio::test]
    async fn appended_messages_load_in_order() {
        let store = store().await;
        let conversation_id = ConversationId::generate();
        store.append_message(conversation_id, &ChatMessage::user("hola")).await.unwrap();
        store
            .append_message(conversation_id, &ChatMessage::assistant("hola!", AgentKey::orchestrator()))
            .await
            .unwrap();

        let messages = store.load_messages(conversation_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].sender, Sender::Assistant);
    }

    #[tokio::test]
    async fn clearing_context_removes_context_and_messages() {
        let store = store().await;
        let conversation_id = ConversationId::generate();
        store.apply(conversation_id, ConversationContextDelta::default()).await.unwrap();
        store.append_message(conversation_id, &ChatMessage::user("hola")).await.unwrap();

        store.clear_context(conversation_id).await.unwrap();

        assert!(store.get(conversation_id).await.unwrap().is_none());
        assert!(store.load_messages(conversation_id).await.unwrap().is_empty());
    }
}
