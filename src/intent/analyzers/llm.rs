//! LLM-backed intent analyzer (C4): the primary, highest-confidence tier.
//! Calls out to an injected `LlmClient`, validates and caches the result,
//! and degrades to a low-confidence fallback on any failure rather than
//! propagating an error — the router treats "analyzer ran but scored low"
//! and "analyzer unavailable" identically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain_types::{AgentKey, Intent, UnitScore};

use super::super::cache::{CacheKey, CacheKeyContext, IntentCache};
use super::super::validator::ConversationSnapshot;
use super::super::{AnalysisContext, AnalysisMethod, IntentResult, IntentValidator};
use super::IntentAnalyzer;

/// Sampling temperature for intent-classification calls: low enough to
/// keep the model's output close to deterministic.
const INTENT_LLM_TEMPERATURE: f32 = 0.3;

/// Default per-call timeout; the same budget the source system applies
/// via `INTENT_LLM_TIMEOUT`.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A chat-completion backend the analyzer calls to classify intent.
/// Deliberately the same shape as the supervisor's completion client —
/// both are "send a prompt, get text back" — but kept as its own trait so
/// the two call sites can be wired to different models/timeouts.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Completes `system_prompt` + `user_prompt` at the given temperature.
    async fn complete(&self, system_prompt: &str, user_prompt: &str, temperature: f32) -> Result<String, LlmCallError>;
}

/// Failure calling the LLM backend.
#[derive(Debug, Error)]
#[error("llm backend failed: {0}")]
pub struct LlmCallError(pub String);

#[derive(Debug, Deserialize)]
struct RawLlmResponse {
    intent: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    entities: serde_json::Map<String, serde_json::Value>,
}

fn build_system_prompt(valid_intents: &[String]) -> String {
    format!(
        "You classify a user's message into exactly one of these intents: {}. \
         Respond with a single JSON object: {{\"intent\": string, \"confidence\": number between 0 and 1, \
         \"reasoning\": string, \"entities\": object}}. Do not include any other text.",
        valid_intents.join(", ")
    )
}

fn build_user_prompt(message: &str, context: &AnalysisContext<'_>) -> String {
    let mut prompt = format!("Message: {message}\n");
    if let Some(summary) = context.rolling_summary {
        if !summary.is_empty() {
            prompt.push_str(&format!("Conversation so far: {summary}\n"));
        }
    }
    if let Some(previous_agent) = context.previous_agent {
        prompt.push_str(&format!("Previous agent: {previous_agent}\n"));
    }
    prompt
}

/// Extracts the first well-formed JSON object found in `text`, tolerating
/// surrounding prose or markdown fences the way LLMs tend to wrap
/// structured output in.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Primary intent analyzer: classifies via an injected LLM, validates the
/// result against the tenant's valid-intent set, and caches it.
pub struct LlmIntentAnalyzer<C: LlmClient> {
    client: Arc<C>,
    cache: Arc<IntentCache>,
    validator: Arc<IntentValidator>,
    timeout: Duration,
}

impl<C: LlmClient> LlmIntentAnalyzer<C> {
    /// Builds an analyzer with the default 60-second per-call timeout.
    #[must_use]
    pub fn new(client: Arc<C>, cache: Arc<IntentCache>, validator: Arc<IntentValidator>) -> Self {
        Self {
            client,
            cache,
            validator,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn fallback_result(reason: &str) -> IntentResult {
        IntentResult {
            primary_intent: Intent::fallback(),
            confidence: UnitScore::clamped(0.3),
            target_agent: AgentKey::fallback(),
            method: AnalysisMethod::Llm,
            reasoning: format!("Fallback: {reason}"),
            entities: Default::default(),
        }
    }

    /// Runs the classification call and validation, without consulting or
    /// populating the cache; `analyze` wraps this with the cache lookup.
    async fn classify(
        &self,
        message: &str,
        context: &AnalysisContext<'_>,
        valid_intents: &std::collections::HashSet<String>,
        intent_to_agent: &std::collections::HashMap<String, AgentKey>,
    ) -> IntentResult {
        let system_prompt = build_system_prompt(&valid_intents.iter().cloned().collect::<Vec<_>>());
        let user_prompt = build_user_prompt(message, context);

        let call = self.client.complete(&system_prompt, &user_prompt, INTENT_LLM_TEMPERATURE);
        let raw = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(text)) => text,
            Ok(Err(error)) => {
                warn!(%error, "LLM intent analysis failed");
                return Self::fallback_result(&error.0);
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "LLM intent analysis timed out");
                return Self::fallback_result("LLM timeout");
            }
        };

        let Some(json_slice) = extract_json_object(&raw) else {
            warn!("failed to extract JSON from LLM response");
            return Self::fallback_result("Failed to parse LLM response");
        };

        let parsed: RawLlmResponse = match serde_json::from_str(json_slice) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(%error, "LLM response JSON did not match expected shape");
                return Self::fallback_result("Failed to parse LLM response");
            }
        };

        let (validated_intent, mut confidence, reasoning) = self.validator.validate(&parsed.intent, valid_intents);
        let is_fallback = validated_intent == Intent::fallback();
        if !is_fallback {
            confidence = parsed.confidence.map_or(confidence, UnitScore::clamped);
        }

        let target_agent = if validated_intent.as_ref() == "follow_up" {
            self.validator.handle_follow_up(
                ConversationSnapshot {
                    previous_agent: context.previous_agent,
                },
                message,
            )
        } else {
            self.validator.map_intent_to_agent(&validated_intent, intent_to_agent)
        };

        IntentResult {
            primary_intent: validated_intent,
            confidence,
            target_agent,
            method: AnalysisMethod::Llm,
            reasoning: parsed.reasoning.unwrap_or(reasoning),
            entities: parsed.entities,
        }
    }
}

#[async_trait]
impl<C: LlmClient> IntentAnalyzer for LlmIntentAnalyzer<C> {
    async fn analyze(&self, message: &str, context: AnalysisContext<'_>) -> IntentResult {
        debug!(message = %message.chars().take(30).collect::<String>(), "LLM analysis starting");

        let cache_key_context = CacheKeyContext {
            language: context.language,
            user_tier: context.user_tier,
            previous_agent: context.previous_agent,
        };
        let cache_key = CacheKey::derive(message, &cache_key_context);
        if let Some(cached) = self.cache.get(cache_key) {
            debug!(intent = %cached.primary_intent, "intent cache hit");
            return cached;
        }

        // Fresh call: the agent registry normally supplies the tenant's
        // valid-intent set and mapping. With neither injected here, the
        // validator's own default mapping is a safe degrade — it still
        // corrects the common agent-name-for-intent-name mistake.
        let valid_intents = super::super::validator::default_valid_intents();
        let intent_to_agent = super::super::validator::default_agent_mapping();

        let result = self.classify(message, &context, &valid_intents, &intent_to_agent).await;
        if result.primary_intent != Intent::fallback() {
            self.cache.set(cache_key, result.clone());
        }
        result
    }

    fn method_name(&self) -> &'static str {
        "ollama_llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct StubClient {
        response: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        async fn complete(&self, _system: &str, _user: &str, _temperature: f32) -> Result<String, LlmCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl LlmClient for FailingClient {
        async fn complete(&self, _system: &str, _user: &str, _temperature: f32) -> Result<String, LlmCallError> {
            Err(LlmCallError("backend unavailable".to_string()))
        }
    }

    fn validator() -> Arc<IntentValidator> {
        Arc::new(IntentValidator::new(AgentKey::fallback()))
    }

    fn cache() -> Arc<IntentCache> {
        Arc::new(IntentCache::new(10, StdDuration::from_secs(60)))
    }

    #[tokio::test]
    async fn parses_well_formed_json_response() {
        let client = Arc::new(StubClient {
            response: r#"{"intent": "saludo", "confidence": 0.95, "reasoning": "greeting detected"}"#.to_string(),
            calls: AtomicUsize::new(0),
        });
        let analyzer = LlmIntentAnalyzer::new(client, cache(), validator());
        let result = analyzer.analyze("hola", AnalysisContext::default()).await;
        assert_eq!(result.primary_intent.as_ref(), "saludo");
        assert_eq!(f64::from(result.confidence), 0.95);
        assert_eq!(result.method, AnalysisMethod::Llm);
    }

    #[tokio::test]
    async fn tolerates_prose_wrapped_json() {
        let client = Arc::new(StubClient {
            response: "Here is my answer:\n```json\n{\"intent\": \"saludo\", \"confidence\": 0.8}\n```".to_string(),
            calls: AtomicUsize::new(0),
        });
        let analyzer = LlmIntentAnalyzer::new(client, cache(), validator());
        let result = analyzer.analyze("hola", AnalysisContext::default()).await;
        assert_eq!(result.primary_intent.as_ref(), "saludo");
    }

    #[tokio::test]
    async fn unparseable_response_falls_back() {
        let client = Arc::new(StubClient {
            response: "I cannot help with that.".to_string(),
            calls: AtomicUsize::new(0),
        });
        let analyzer = LlmIntentAnalyzer::new(client, cache(), validator());
        let result = analyzer.analyze("hola", AnalysisContext::default()).await;
        assert_eq!(result.primary_intent, Intent::fallback());
        assert_eq!(f64::from(result.confidence), 0.3);
    }

    #[tokio::test]
    async fn backend_failure_falls_back_without_panicking() {
        let analyzer = LlmIntentAnalyzer::new(Arc::new(FailingClient), cache(), validator());
        let result = analyzer.analyze("hola", AnalysisContext::default()).await;
        assert_eq!(result.primary_intent, Intent::fallback());
    }

    #[tokio::test]
    async fn repeat_message_hits_cache_without_a_second_call() {
        let client = Arc::new(StubClient {
            response: r#"{"intent": "saludo", "confidence": 0.9}"#.to_string(),
            calls: AtomicUsize::new(0),
        });
        let shared_cache = cache();
        let analyzer = LlmIntentAnalyzer::new(Arc::clone(&client), Arc::clone(&shared_cache), validator());
        let _ = analyzer.analyze("hola", AnalysisContext::default()).await;
        let _ = analyzer.analyze("hola", AnalysisContext::default()).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
