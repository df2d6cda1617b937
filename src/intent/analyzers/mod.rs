//! The three intent analyzers behind the cascade (C4): LLM, local NLP, and
//! keyword matching, all implementing the same `IntentAnalyzer` trait so
//! the router can treat them uniformly.

pub mod keyword;
pub mod llm;
pub mod nlp;

pub use keyword::KeywordIntentAnalyzer;
pub use llm::{LlmCallError, LlmClient, LlmIntentAnalyzer};
pub use nlp::{ExtractedEntity, NlpIntentAnalyzer, NlpModel, NoopNlpModel};

use async_trait::async_trait;

use super::{AnalysisContext, IntentResult};

/// Common interface the router drives without caring which tier produced
/// the result.
#[async_trait]
pub trait IntentAnalyzer: Send + Sync {
    /// Analyzes `message` and returns the best intent this analyzer can
    /// determine. Analyzers never fail outright — they degrade to a
    /// low-confidence fallback result instead, so the router can always
    /// move on to the next tier on a low score rather than an error.
    async fn analyze(&self, message: &str, context: AnalysisContext<'_>) -> IntentResult;

    /// Name surfaced in metrics and `IntentResult::method`/`reasoning`.
    fn method_name(&self) -> &'static str;
}
