//! Intent analysis: the three-tier cascade (LLM → NLP → keyword) behind a
//! deterministic cache and validator, culminating in a single routing
//! decision (C2–C5).

pub mod analyzers;
pub mod cache;
pub mod router;
pub mod validator;

pub use analyzers::{
    ExtractedEntity, IntentAnalyzer, KeywordIntentAnalyzer, LlmCallError, LlmClient, LlmIntentAnalyzer,
    NlpIntentAnalyzer, NlpModel, NoopNlpModel,
};
pub use cache::{CacheKey, CacheKeyContext, CacheStats, IntentCache};
pub use router::{IntentRouter, RouterError, RouterMetrics, RouterMetricsSnapshot};
pub use validator::{default_agent_mapping, default_valid_intents, ConversationSnapshot, IntentValidator};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain_types::{AgentKey, Intent, UnitScore};

/// Which analyzer (or shortcut) ultimately produced an `IntentResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    /// Resolved by the LLM-backed analyzer.
    Llm,
    /// Resolved by the local NLP analyzer.
    Nlp,
    /// Resolved by the keyword analyzer.
    Keyword,
    /// Resolved by pinning to an agent with an active multi-turn flow.
    FlowContinuation,
}

/// The outcome of intent analysis, however it was produced: the intent
/// label, a confidence score, the agent to route to, and enough metadata
/// for metrics and debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    /// The discrete intent label.
    pub primary_intent: Intent,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: UnitScore,
    /// The agent this intent routes to.
    pub target_agent: AgentKey,
    /// Which tier of the cascade produced this result.
    pub method: AnalysisMethod,
    /// A short human-readable explanation, surfaced in logs and traces.
    pub reasoning: String,
    /// Entities the analyzer extracted from the message, if any.
    pub entities: Map<String, Value>,
}

/// Context passed to an analyzer: everything it might need beyond the raw
/// message text.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisContext<'a> {
    /// The conversation's rolling summary, for prompt construction.
    pub rolling_summary: Option<&'a str>,
    /// The bot's most recent final response.
    pub last_bot_response: Option<&'a str>,
    /// The agent that produced the previous turn's response.
    pub previous_agent: Option<&'a str>,
    /// BCP-47-ish language code.
    pub language: &'a str,
    /// The caller's subscription tier, used for cache-key scoping.
    pub user_tier: &'a str,
}
