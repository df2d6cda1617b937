//! The frame passed between graph nodes for the duration of one turn.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain_types::{AgentKey, ConversationId, Counter, OrganizationId};
use crate::supervisor::{ConversationFlow, QualityEvaluation};

use super::reducers::{
    concat_append, last_non_null_wins, merge_if_present, shallow_union_right_wins,
};

/// Who produced a message in the turn's running transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The end user.
    User,
    /// A worker, orchestrator, or supervisor response.
    Assistant,
    /// Internal bookkeeping, never shown to the user.
    System,
}

/// One entry in the turn's transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who sent it.
    pub sender: Sender,
    /// The message text.
    pub content: String,
    /// The agent that produced this message, when `sender` is `Assistant`.
    pub agent_name: Option<AgentKey>,
}

impl ChatMessage {
    /// Builds a user-authored message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            content: content.into(),
            agent_name: None,
        }
    }

    /// Builds an assistant-authored message attributed to `agent_name`.
    #[must_use]
    pub fn assistant(content: impl Into<String>, agent_name: AgentKey) -> Self {
        Self {
            sender: Sender::Assistant,
            content: content.into(),
            agent_name: Some(agent_name),
        }
    }
}

/// Evidence a worker reports about its own retrieval step; absence means
/// re-routing cannot help (see `QualityEvaluator::suggested_action`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagMetrics {
    /// Whether the worker's retrieval step returned anything.
    pub has_results: bool,
    /// How many results it returned, when the worker reports a count rather
    /// than a boolean (`ExcelenciaNode` reports `has_results`; others report
    /// `result_count`).
    pub result_count: usize,
}

impl RagMetrics {
    /// True if either the boolean or the count indicates retrieved data.
    #[must_use]
    pub fn had_results(&self) -> bool {
        self.has_results || self.result_count > 0
    }
}

/// Which path the orchestrator took to produce `next_agent`, surfaced for
/// admin/observability parity with the source system's
/// `routing_decision.routing_strategy` (§4.6, S6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// A bypass rule (request-level or tenant-configured) set `next_agent`
    /// directly, skipping the intent cascade entirely.
    Bypass,
    /// The intent cascade (flow check, then LLM/NLP/keyword analyzers)
    /// determined `next_agent`.
    Cascade,
}

/// The frame threaded through the graph for the duration of one turn.
///
/// `GraphState` is never mutated in place; nodes return a `GraphStateDelta`
/// and the engine folds it in via `merge`, per the algebraic-record design
/// in `DESIGN.md`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphState {
    /// Append-only transcript for this turn (and, once loaded, prior turns).
    pub messages: Vec<ChatMessage>,
    /// The conversation this turn belongs to.
    pub conversation_id: ConversationId,
    /// The tenant this turn belongs to.
    pub organization_id: OrganizationId,
    /// Caller-supplied user identifier, if any.
    pub user_id: Option<String>,
    /// Caller-supplied phone number, used for bypass matching.
    pub user_phone: Option<String>,
    /// Inbound WhatsApp Business phone number id, used for bypass matching.
    pub whatsapp_phone_number_id: Option<String>,
    /// The agent currently executing, if any.
    pub current_agent: Option<AgentKey>,
    /// The agent the graph router should dispatch to next.
    pub next_agent: Option<AgentKey>,
    /// Every agent invoked so far this turn, in invocation order.
    pub agent_history: Vec<AgentKey>,
    /// Number of times the orchestrator has routed to a worker this turn.
    pub routing_attempts: Counter,
    /// Number of times the supervisor has requested a re-route this turn.
    pub supervisor_retry_count: Counter,
    /// Number of worker/engine errors absorbed this turn.
    pub error_count: Counter,
    /// Set once the supervisor (or a terminal worker) ends the turn.
    pub is_complete: bool,
    /// Set when the supervisor escalates to a human.
    pub human_handoff_requested: bool,
    /// Set when the supervisor wants another routing pass.
    pub needs_re_routing: bool,
    /// Shallow-unioned bag of worker-retrieved data.
    pub retrieved_data: Map<String, Value>,
    /// The supervisor's most recent quality evaluation, if any.
    pub supervisor_evaluation: Option<QualityEvaluation>,
    /// The supervisor's most recent flow decision, if any.
    pub conversation_flow: Option<ConversationFlow>,
    /// Worker-reported retrieval evidence for the current response.
    pub rag_metrics: Option<RagMetrics>,
    /// Generic interactive-response-type extension point (see DESIGN.md
    /// Open Question 2 — the pharmacy/WhatsApp button and list-item payload
    /// this generalizes is out of scope).
    pub response_type: Option<String>,
    /// How the most recent `next_agent` was determined.
    pub routing_strategy: Option<RoutingStrategy>,
}

impl GraphState {
    /// Builds the initial state for a brand-new turn: one user message, a
    /// previously-loaded conversation identity, and all counters at zero.
    #[must_use]
    pub fn new_turn(
        conversation_id: ConversationId,
        organization_id: OrganizationId,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            messages: vec![ChatMessage::user(user_message)],
            conversation_id,
            organization_id,
            user_id: None,
            user_phone: None,
            whatsapp_phone_number_id: None,
            current_agent: None,
            next_agent: None,
            agent_history: Vec::new(),
            routing_attempts: Counter::default(),
            supervisor_retry_count: Counter::default(),
            error_count: Counter::default(),
            is_complete: false,
            human_handoff_requested: false,
            needs_re_routing: false,
            retrieved_data: Map::new(),
            supervisor_evaluation: None,
            conversation_flow: None,
            rag_metrics: None,
            response_type: None,
            routing_strategy: None,
        }
    }

    /// The most recent user message, if any — what the node executor feeds
    /// to a worker.
    #[must_use]
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.sender == Sender::User)
            .map(|message| message.content.as_str())
    }

    /// The most recent assistant message, if any — what the supervisor
    /// evaluates and, on enhancement, replaces.
    #[must_use]
    pub fn last_assistant_message_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|message| message.sender == Sender::Assistant)
    }

    /// Folds `delta` into `self` using each field's merge strategy,
    /// returning the new state.
    #[must_use]
    pub fn merge(mut self, delta: GraphStateDelta) -> Self {
        self.messages = concat_append(self.messages, delta.messages);
        self.agent_history = concat_append(self.agent_history, delta.agent_history);
        self.current_agent = last_non_null_wins(self.current_agent, delta.current_agent);
        self.next_agent = last_non_null_wins(self.next_agent, delta.next_agent);
        self.routing_attempts = delta.routing_attempts.unwrap_or(self.routing_attempts);
        self.supervisor_retry_count = delta
            .supervisor_retry_count
            .unwrap_or(self.supervisor_retry_count);
        self.error_count = delta.error_count.unwrap_or(self.error_count);
        self.is_complete = delta.is_complete.unwrap_or(self.is_complete);
        self.human_handoff_requested = delta
            .human_handoff_requested
            .unwrap_or(self.human_handoff_requested);
        self.needs_re_routing = delta.needs_re_routing.unwrap_or(self.needs_re_routing);
        self.retrieved_data = shallow_union_right_wins(
            Value::Object(self.retrieved_data),
            Value::Object(delta.retrieved_data),
        )
        .as_object()
        .cloned()
        .unwrap_or_default();
        self.supervisor_evaluation =
            last_non_null_wins(self.supervisor_evaluation, delta.supervisor_evaluation);
        self.conversation_flow = last_non_null_wins(self.conversation_flow, delta.conversation_flow);
        self.rag_metrics = last_non_null_wins(self.rag_metrics, delta.rag_metrics);
        self.response_type = last_non_null_wins(self.response_type, delta.response_type);
        self.routing_strategy = last_non_null_wins(self.routing_strategy, delta.routing_strategy);
        self
    }

    /// Replaces the content of the most recent assistant message in place.
    /// The append-only delta reducers can't express "rewrite", so the
    /// response enhancer's rewrite is applied here directly rather than
    /// through a delta field — mirrors the source system's
    /// `_replace_last_assistant_message`.
    #[must_use]
    pub fn replace_last_assistant_message(mut self, content: String) -> Self {
        if let Some(index) = self.last_assistant_message_index() {
            self.messages[index].content = content;
        }
        self
    }

    /// Testable property 4: at most one terminal flag is set. Called at
    /// the end of every supervisor pass.
    #[must_use]
    pub fn at_most_one_terminal_flag(&self) -> bool {
        [
            self.is_complete,
            self.human_handoff_requested,
            self.needs_re_routing,
        ]
        .iter()
        .filter(|flag| **flag)
        .count()
        <= 1
    }
}

/// A partial update to `GraphState` returned by a node; merged in by
/// `GraphState::merge` using each field's reducer rather than overwriting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStateDelta {
    /// Messages appended by this node.
    pub messages: Vec<ChatMessage>,
    /// Agent keys appended to the history by this node (usually zero or one).
    pub agent_history: Vec<AgentKey>,
    /// Overwrites `current_agent` when set.
    pub current_agent: Option<AgentKey>,
    /// Overwrites `next_agent` when set (last-non-null semantics).
    pub next_agent: Option<AgentKey>,
    /// Overwrites `routing_attempts` when set.
    pub routing_attempts: Option<Counter>,
    /// Overwrites `supervisor_retry_count` when set.
    pub supervisor_retry_count: Option<Counter>,
    /// Overwrites `error_count` when set.
    pub error_count: Option<Counter>,
    /// Overwrites `is_complete` when set.
    pub is_complete: Option<bool>,
    /// Overwrites `human_handoff_requested` when set.
    pub human_handoff_requested: Option<bool>,
    /// Overwrites `needs_re_routing` when set.
    pub needs_re_routing: Option<bool>,
    /// Shallow-unioned into `retrieved_data`.
    pub retrieved_data: Map<String, Value>,
    /// Overwrites `supervisor_evaluation` when set.
    pub supervisor_evaluation: Option<QualityEvaluation>,
    /// Overwrites `conversation_flow` when set.
    pub conversation_flow: Option<ConversationFlow>,
    /// Overwrites `rag_metrics` when set.
    pub rag_metrics: Option<RagMetrics>,
    /// Overwrites `response_type` when set.
    pub response_type: Option<String>,
    /// Overwrites `routing_strategy` when set.
    pub routing_strategy: Option<RoutingStrategy>,
}

impl GraphStateDelta {
    /// An empty delta; useful as a base for builder-style construction.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the apology delta the node executor returns on worker
    /// failure or a missing worker.
    #[must_use]
    pub fn apology(message: impl Into<String>, error_count: Counter, agent: Option<AgentKey>) -> Self {
        let mut delta = Self::empty();
        delta.messages.push(ChatMessage {
            sender: Sender::Assistant,
            content: message.into(),
            agent_name: agent,
        });
        delta.error_count = Some(error_count);
        delta
    }

    /// Merges `other` on top of `self` field-by-field using the same
    /// reducers `GraphState::merge` uses, so an executor can compose the
    /// per-field deltas of several sub-steps before returning to the
    /// engine (e.g. node executor + supervisor-forced completion).
    #[must_use]
    pub fn merge_delta(mut self, other: Self) -> Self {
        self.messages = concat_append(self.messages, other.messages);
        self.agent_history = concat_append(self.agent_history, other.agent_history);
        self.current_agent = last_non_null_wins(self.current_agent, other.current_agent);
        self.next_agent = last_non_null_wins(self.next_agent, other.next_agent);
        self.routing_attempts = last_non_null_wins(self.routing_attempts, other.routing_attempts);
        self.supervisor_retry_count =
            last_non_null_wins(self.supervisor_retry_count, other.supervisor_retry_count);
        self.error_count = last_non_null_wins(self.error_count, other.error_count);
        self.is_complete = last_non_null_wins(self.is_complete, other.is_complete);
        self.human_handoff_requested =
            last_non_null_wins(self.human_handoff_requested, other.human_handoff_requested);
        self.needs_re_routing = last_non_null_wins(self.needs_re_routing, other.needs_re_routing);
        self.retrieved_data = merge_if_present(self.retrieved_data, other.retrieved_data);
        self.supervisor_evaluation =
            last_non_null_wins(self.supervisor_evaluation, other.supervisor_evaluation);
        self.conversation_flow = last_non_null_wins(self.conversation_flow, other.conversation_flow);
        self.rag_metrics = last_non_null_wins(self.rag_metrics, other.rag_metrics);
        self.response_type = last_non_null_wins(self.response_type, other.response_type);
        self.routing_strategy = last_non_null_wins(self.routing_strategy, other.routing_strategy);
        self
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> GraphState {
        GraphState::new_turn(ConversationId::generate(), OrganizationId::generate(), "hola")
    }

    #[test]
    fn merge_appends_messages_and_history() {
        let mut delta = GraphStateDelta::empty();
        delta.messages.push(ChatMessage::assistant("hi", AgentKey::fallback()));
        delta.agent_history.push(AgentKey::fallback());

        let merged = state().merge(delta);
        assert_eq!(merged.messages.len(), 2);
        assert_eq!(merged.agent_history, vec![AgentKey::fallback()]);
    }

    #[test]
    fn merge_preserves_next_agent_when_delta_silent() {
        let mut first = GraphStateDelta::empty();
        first.next_agent = Some(AgentKey::try_new("greeting_agent").unwrap());
        let merged = state().merge(first);

        let second = GraphStateDelta::empty();
        let merged = merged.merge(second);
        assert_eq!(merged.next_agent, Some(AgentKey::try_new("greeting_agent").unwrap()));
    }

    #[test]
    fn merge_retrieved_data_is_shallow_union_right_wins() {
        let mut delta = GraphStateDelta::empty();
        delta
            .retrieved_data
            .insert("product".to_string(), json!({"sku": "abc"}));
        let merged = state().merge(delta);
        assert_eq!(merged.retrieved_data.get("product"), Some(&json!({"sku": "abc"})));
    }

    #[test]
    fn at_most_one_terminal_flag_detects_violation() {
        let mut s = state();
        s.is_complete = true;
        s.needs_re_routing = true;
        assert!(!s.at_most_one_terminal_flag());
    }
}
