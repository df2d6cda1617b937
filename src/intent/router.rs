//! Intent router (C5): orchestrates the LLM → NLP → keyword cascade,
//! short-circuiting on an active multi-turn flow and on the first tier
//! confident enough to trust.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::debug;

use super::analyzers::{IntentAnalyzer, KeywordIntentAnalyzer, NlpIntentAnalyzer};
use super::validator::ConversationSnapshot;
use super::{AnalysisContext, IntentResult, IntentValidator};

/// Minimum confidence the LLM tier must clear before its result is
/// trusted; below this the router falls through to NLP.
const LLM_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Minimum confidence the NLP tier must clear before its result is
/// trusted; below this the router falls through to keyword matching.
const NLP_CONFIDENCE_THRESHOLD: f64 = 0.4;

/// Errors the router itself can raise; the analyzers never propagate
/// errors (they degrade to low-confidence results instead), so this is
/// presently limited to misconfiguration the caller should treat as fatal.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The router was built with neither an LLM nor NLP analyzer and no
    /// keyword analyzer either — there would be nothing to call.
    #[error("intent router has no analyzers configured")]
    NoAnalyzersConfigured,
}

/// Atomically-updated counters mirroring the source system's routing
/// metrics; cheap to read concurrently from a status endpoint.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    total_requests: AtomicU64,
    llm_calls: AtomicU64,
    nlp_calls: AtomicU64,
    keyword_calls: AtomicU64,
    fallback_calls: AtomicU64,
    total_response_micros: AtomicU64,
}

impl RouterMetrics {
    fn record(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the counters and the running average response time.
    #[must_use]
    pub fn stats(&self) -> RouterMetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_micros = self.total_response_micros.load(Ordering::Relaxed);
        let avg_response_time_ms = if total_requests == 0 {
            0.0
        } else {
            (total_micros as f64 / total_requests as f64) / 1000.0
        };
        RouterMetricsSnapshot {
            total_requests,
            llm_calls: self.llm_calls.load(Ordering::Relaxed),
            nlp_calls: self.nlp_calls.load(Ordering::Relaxed),
            keyword_calls: self.keyword_calls.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
            avg_response_time_ms,
        }
    }
}

/// A point-in-time read of `RouterMetrics`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterMetricsSnapshot {
    /// Total `determine_intent` calls.
    pub total_requests: u64,
    /// Calls that reached the LLM tier.
    pub llm_calls: u64,
    /// Calls that fell through to the NLP tier.
    pub nlp_calls: u64,
    /// Calls that fell through to the keyword tier.
    pub keyword_calls: u64,
    /// Calls where every tier degraded to a fallback result.
    pub fallback_calls: u64,
    /// Running average response time, in milliseconds.
    pub avg_response_time_ms: f64,
}

/// Orchestrates the intent-analysis cascade: flow pinning, then LLM, then
/// NLP, then keyword matching, always returning a result.
pub struct IntentRouter {
    llm_analyzer: Option<Arc<dyn IntentAnalyzer>>,
    nlp_analyzer: Option<Arc<NlpIntentAnalyzer>>,
    keyword_analyzer: Arc<KeywordIntentAnalyzer>,
    validator: Arc<IntentValidator>,
    metrics: RouterMetrics,
}

impl IntentRouter {
    /// Builds a router. `llm_analyzer` and `nlp_analyzer` are optional —
    /// a deployment with neither still routes correctly via keywords.
    #[must_use]
    pub fn new(
        llm_analyzer: Option<Arc<dyn IntentAnalyzer>>,
        nlp_analyzer: Option<Arc<NlpIntentAnalyzer>>,
        keyword_analyzer: Arc<KeywordIntentAnalyzer>,
        validator: Arc<IntentValidator>,
    ) -> Self {
        Self {
            llm_analyzer,
            nlp_analyzer,
            keyword_analyzer,
            validator,
            metrics: RouterMetrics::default(),
        }
    }

    /// Current metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> RouterMetricsSnapshot {
        self.metrics.stats()
    }

    /// Runs the cascade for `message`, always returning a result: an
    /// active-flow pin, the first analyzer tier confident enough, or the
    /// keyword tier's best effort.
    pub async fn determine_intent(
        &self,
        message: &str,
        context: AnalysisContext<'_>,
        conversation: ConversationSnapshot<'_>,
    ) -> IntentResult {
        let start = Instant::now();
        self.metrics.record(&self.metrics.total_requests);

        let result = self.determine_intent_inner(message, context, conversation).await;

        let elapsed_micros = start.elapsed().as_micros().min(u128::from(u64::MAX)) as u64;
        self.metrics.total_response_micros.fetch_add(elapsed_micros, Ordering::Relaxed);
        if result.primary_intent == crate::domain_types::Intent::fallback() {
            self.metrics.record(&self.metrics.fallback_calls);
        }

        result
    }

    async fn determine_intent_inner(
        &self,
        message: &str,
        context: AnalysisContext<'_>,
        conversation: ConversationSnapshot<'_>,
    ) -> IntentResult {
        if let Some(flow_result) = self.validator.check_active_flow(conversation) {
            debug!(target_agent = %flow_result.target_agent, "active flow pinned");
            return flow_result;
        }

        if let Some(llm) = &self.llm_analyzer {
            self.metrics.record(&self.metrics.llm_calls);
            let result = llm.analyze(message, context).await;
            if f64::from(result.confidence) >= LLM_CONFIDENCE_THRESHOLD {
                return result;
            }
            debug!(confidence = f64::from(result.confidence), "LLM confidence too low");
        }

        if let Some(nlp) = &self.nlp_analyzer {
            if nlp.is_available() {
                self.metrics.record(&self.metrics.nlp_calls);
                let result = nlp.analyze(message, context).await;
                if f64::from(result.confidence) >= NLP_CONFIDENCE_THRESHOLD {
                    return result;
                }
                debug!(confidence = f64::from(result.confidence), "NLP confidence too low");
            }
        }

        self.metrics.record(&self.metrics.keyword_calls);
        self.keyword_analyzer.analyze(message, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::AgentKey;
    use async_trait::async_trait;

    struct StubAnalyzer {
        confidence: f64,
    }

    #[async_trait]
    impl IntentAnalyzer for StubAnalyzer {
        async fn analyze(&self, _message: &str, _context: AnalysisContext<'_>) -> IntentResult {
            IntentResult {
                primary_intent: crate::domain_types::Intent::try_new("producto").unwrap(),
                confidence: crate::domain_types::UnitScore::clamped(self.confidence),
                target_agent: AgentKey::try_new("product_agent").unwrap(),
                method: super::super::AnalysisMethod::Llm,
                reasoning: "stub".to_string(),
                entities: Default::default(),
            }
        }

        fn method_name(&self) -> &'static str {
            "stub"
        }
    }

    fn keyword_analyzer() -> Arc<KeywordIntentAnalyzer> {
        Arc::new(KeywordIntentAnalyzer::new(Arc::new(IntentValidator::new(AgentKey::fallback()))))
    }

    #[tokio::test]
    async fn confident_llm_result_short_circuits_nlp_and_keyword() {
        let router = IntentRouter::new(
            Some(Arc::new(StubAnalyzer { confidence: 0.9 })),
            None,
            keyword_analyzer(),
            Arc::new(IntentValidator::new(AgentKey::fallback())),
        );
        let result = router
            .determine_intent("cualquier cosa", AnalysisContext::default(), ConversationSnapshot::default())
            .await;
        assert_eq!(result.primary_intent.as_ref(), "producto");
        assert_eq!(router.metrics().llm_calls, 1);
        assert_eq!(router.metrics().keyword_calls, 0);
    }

    #[tokio::test]
    async fn low_confidence_llm_falls_through_to_keyword() {
        let router = IntentRouter::new(
            Some(Arc::new(StubAnalyzer { confidence: 0.2 })),
            None,
            keyword_analyzer(),
            Arc::new(IntentValidator::new(AgentKey::fallback())),
        );
        let result = router
            .determine_intent("hola, buenos días", AnalysisContext::default(), ConversationSnapshot::default())
            .await;
        assert_eq!(result.primary_intent.as_ref(), "saludo");
        assert_eq!(router.metrics().keyword_calls, 1);
    }

    #[tokio::test]
    async fn active_flow_bypasses_every_analyzer() {
        let router = IntentRouter::new(
            Some(Arc::new(StubAnalyzer { confidence: 0.9 })),
            None,
            keyword_analyzer(),
            Arc::new(IntentValidator::new(AgentKey::fallback())),
        );
        let result = router
            .determine_intent(
                "cualquier cosa",
                AnalysisContext::default(),
                ConversationSnapshot {
                    previous_agent: Some("excelencia_support_agent"),
                },
            )
            .await;
        assert_eq!(result.target_agent.as_ref(), "excelencia_support_agent");
        assert_eq!(router.metrics().llm_calls, 0);
    }

    #[tokio::test]
    async fn no_analyzers_still_routes_via_keyword() {
        let router = IntentRouter::new(None, None, keyword_analyzer(), Arc::new(IntentValidator::new(AgentKey::fallback())));
        let result = router
            .determine_intent("hola", AnalysisContext::default(), ConversationSnapshot::default())
            .await;
        assert_eq!(result.primary_intent.as_ref(), "saludo");
    }
}
