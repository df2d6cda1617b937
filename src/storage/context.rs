//! The conversation context record itself and the delta type callers use to
//! update it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain_types::{AgentKey, ConversationId, OrganizationId, Timestamp};

/// The rolling summary and bookkeeping fields injected into every worker's
/// prompt for a given conversation.
///
/// This is the only place `rolling_summary` is authoritative — the
/// supervisor and graph state treat it as read-only context, never writing
/// it back (see the design decision recorded alongside this module).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// The conversation this context belongs to.
    pub conversation_id: ConversationId,
    /// The tenant this conversation belongs to.
    pub organization_id: OrganizationId,
    /// The user's phone number, when the channel provides one.
    pub user_phone: Option<String>,
    /// A compacted summary of everything said so far, built by the
    /// orchestrator and injected into downstream prompts.
    pub rolling_summary: String,
    /// Topics discussed, oldest first.
    pub topic_history: Vec<String>,
    /// Named entities extracted from the conversation so far.
    pub key_entities: Map<String, Value>,
    /// Total turns completed.
    pub total_turns: u32,
    /// The user's most recent message.
    pub last_user_message: Option<String>,
    /// The bot's most recent final response.
    pub last_bot_response: Option<String>,
    /// The agent that produced the last response, for flow continuity.
    pub last_agent: Option<AgentKey>,
    /// Free-form per-conversation metadata.
    pub metadata: Map<String, Value>,
    /// When this context was first created.
    pub created_at: Timestamp,
    /// When this context was last updated.
    pub updated_at: Timestamp,
    /// When the conversation last had activity (distinct from `updated_at`
    /// so a metadata-only patch doesn't look like a fresh turn).
    pub last_activity_at: Timestamp,
}

impl ConversationContext {
    /// Builds a brand-new, empty context for a conversation's first turn.
    #[must_use]
    pub fn new(conversation_id: ConversationId, organization_id: OrganizationId, user_phone: Option<String>) -> Self {
        let now = Timestamp::now();
        Self {
            conversation_id,
            organization_id,
            user_phone,
            rolling_summary: String::new(),
            topic_history: Vec::new(),
            key_entities: Map::new(),
            total_turns: 0,
            last_user_message: None,
            last_bot_response: None,
            last_agent: None,
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
            last_activity_at: now,
        }
    }

    /// Renders the summary for injection into a worker's prompt, or an
    /// empty string if there is nothing to say yet.
    #[must_use]
    pub fn to_prompt_context(&self) -> String {
        if self.rolling_summary.is_empty() {
            String::new()
        } else {
            format!("## Contexto de conversación anterior:\n{}", self.rolling_summary)
        }
    }

    /// Applies `delta` on top of this context, bumping turn-tracking fields
    /// and timestamps, matching `update_from_exchange` in the source
    /// system.
    #[must_use]
    pub fn apply(mut self, delta: ConversationContextDelta) -> Self {
        let now = Timestamp::now();
        if let Some(organization_id) = delta.organization_id {
            self.organization_id = organization_id;
        }
        if let Some(user_phone) = delta.user_phone {
            self.user_phone = Some(user_phone);
        }
        if let Some(summary) = delta.rolling_summary {
            self.rolling_summary = summary;
        }
        if let Some(topic) = delta.new_topic {
            self.topic_history.push(topic);
        }
        for (key, value) in delta.key_entities {
            self.key_entities.insert(key, value);
        }
        for (key, value) in delta.metadata {
            self.metadata.insert(key, value);
        }
        if let Some(last_agent) = delta.last_agent {
            self.last_agent = Some(last_agent);
        }
        if delta.exchange.is_some() {
            self.total_turns += 1;
        }
        if let Some((user_message, bot_response)) = delta.exchange {
            self.last_user_message = Some(user_message);
            self.last_bot_response = Some(bot_response);
        }
        self.updated_at = now;
        self.last_activity_at = now;
        self
    }
}

/// A partial update applied to a `ConversationContext`. Mirrors
/// `update_from_exchange` plus the summary/entity/topic extraction the
/// orchestrator performs between turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContextDelta {
    /// The tenant this conversation belongs to. Carried on every turn so a
    /// first-turn miss seeds the real tenant rather than a placeholder, and
    /// so a row created before the tenant was known can self-correct.
    pub organization_id: Option<OrganizationId>,
    /// The user's phone number, when the request provides one. Only
    /// overwrites the stored value when present, so a turn from a channel
    /// that doesn't resupply the phone doesn't erase a previously-recorded
    /// one.
    pub user_phone: Option<String>,
    /// Replaces the rolling summary wholesale (the orchestrator
    /// regenerates it from the full transcript rather than appending).
    pub rolling_summary: Option<String>,
    /// A topic to append to `topic_history`.
    pub new_topic: Option<String>,
    /// Entities to merge into `key_entities`.
    pub key_entities: Map<String, Value>,
    /// Metadata to merge into `metadata`.
    pub metadata: Map<String, Value>,
    /// The agent that produced this turn's final response.
    pub last_agent: Option<AgentKey>,
    /// The (user message, bot response) pair completing this turn, if the
    /// turn reached a final response.
    pub exchange: Option<(String, String)>,
}
