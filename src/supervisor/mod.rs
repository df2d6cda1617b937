//! The supervisor (C10): the closed-loop quality gate that runs after every
//! worker turn. Composes the quality evaluator, flow controller, and
//! (optionally) the response enhancer into a single decision.

pub mod flow_controller;
pub mod quality_evaluator;
pub mod response_enhancer;

pub use flow_controller::{ConversationFlow, DecisionType, FlowContext, FlowController};
pub use quality_evaluator::{QualityEvaluation, QualityEvaluator, QueryType, ResponseCategory, SuggestedAction};
pub use response_enhancer::{CompletionClient, CompletionError, ResponseEnhancer};

use thiserror::Error;

use crate::domain_types::{AgentKey, Counter, MaxAttempts};
use crate::state::{ChatMessage, Sender};

/// Errors raised while evaluating a turn.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The turn has no assistant message to evaluate; the conversation
    /// history is malformed (a worker ran without producing output).
    #[error("no agent response found in conversation history")]
    NoAgentResponse,
}

/// The full result of supervising one turn.
#[derive(Debug, Clone)]
pub struct SupervisorOutcome {
    /// The structured quality evaluation.
    pub evaluation: QualityEvaluation,
    /// The flow controller's decision.
    pub flow: ConversationFlow,
    /// Whether the turn is over.
    pub is_complete: bool,
    /// Whether the turn should loop back through the router.
    pub needs_re_routing: bool,
    /// Whether a human should take over.
    pub human_handoff_requested: bool,
    /// The enhanced response text, if enhancement ran and succeeded.
    pub enhanced_response: Option<String>,
}

/// Input the supervisor needs about the turn so far.
pub struct TurnContext<'a> {
    /// The user's message this turn.
    pub user_message: &'a str,
    /// The agent that produced the response under evaluation.
    pub agent_name: &'a AgentKey,
    /// Whether the agent's own retrieval step reported results.
    pub rag_had_results: bool,
    /// Errors absorbed so far this turn.
    pub error_count: Counter,
    /// Supervisor retries so far this turn.
    pub supervisor_retry_count: Counter,
    /// Every agent invoked so far this turn, in order.
    pub agent_history: &'a [AgentKey],
    /// The full conversation history, most recent last.
    pub messages: &'a [ChatMessage],
    /// BCP-47-ish language code used to prompt the enhancer, if enabled.
    pub language: &'a str,
}

/// Finds the most recent assistant message in `messages`, scanning from the
/// end, mirroring how the orchestrator locates "the response just produced".
#[must_use]
pub fn extract_last_agent_response(messages: &[ChatMessage]) -> Option<&ChatMessage> {
    messages.iter().rev().find(|m| m.sender == Sender::Assistant)
}

/// Collects the user messages from `messages`, most recent last, for
/// frustration detection.
#[must_use]
pub fn recent_user_messages(messages: &[ChatMessage]) -> Vec<String> {
    messages
        .iter()
        .rev()
        .take(4)
        .filter(|m| m.sender == Sender::User)
        .map(|m| m.content.clone())
        .rev()
        .collect()
}

/// Composes the quality evaluator, flow controller, and optional response
/// enhancer into the supervisor's single per-turn decision.
pub struct Supervisor<C: CompletionClient> {
    quality_evaluator: QualityEvaluator,
    flow_controller: FlowController,
    enhancer: Option<ResponseEnhancer<C>>,
    enable_response_enhancement: bool,
    enhancement_score_ceiling: f64,
}

impl<C: CompletionClient> Supervisor<C> {
    /// Builds a supervisor. `enhancer` may be `None` even when
    /// `enable_response_enhancement` is `true`; enhancement is then simply
    /// skipped, matching the source system's "no ollama client configured"
    /// fallback.
    #[must_use]
    pub fn new(
        quality_evaluator: QualityEvaluator,
        max_retries: MaxAttempts,
        quality_threshold: f64,
        enhancer: Option<ResponseEnhancer<C>>,
        enable_response_enhancement: bool,
    ) -> Self {
        Self {
            quality_evaluator,
            flow_controller: FlowController::new(quality_threshold, max_retries),
            enhancer,
            enable_response_enhancement,
            enhancement_score_ceiling: 0.8,
        }
    }

    /// Evaluates the turn, decides the flow outcome, and conditionally
    /// rewrites the response. This is the supervisor node's entire body.
    pub async fn evaluate_turn(&self, context: &TurnContext<'_>) -> Result<SupervisorOutcome, SupervisorError> {
        let agent_response = extract_last_agent_response(context.messages).ok_or(SupervisorError::NoAgentResponse)?;

        let evaluation = self.quality_evaluator.evaluate(
            context.user_message,
            &agent_response.content,
            context.agent_name,
            context.rag_had_results,
            context.supervisor_retry_count.into_inner(),
            context.agent_history,
        );

        let frustration_context = recent_user_messages(context.messages);
        let flow_context = FlowContext {
            error_count: context.error_count,
            supervisor_retry_count: context.supervisor_retry_count,
            agent_history: context.agent_history,
            recent_user_messages: &frustration_context,
        };
        let mut flow = self.flow_controller.determine_flow(&evaluation, &flow_context);
        let should_provide_final = self
            .flow_controller
            .should_provide_final_response(&evaluation, &flow_context);

        let overall: f64 = evaluation.overall_score.into_inner();
        let can_enhance = (flow.should_end || should_provide_final)
            && !flow.needs_human_handoff
            && self.enable_response_enhancement
            && overall < self.enhancement_score_ceiling;

        let enhanced_response = if can_enhance {
            match &self.enhancer {
                Some(enhancer) => {
                    enhancer
                        .enhance(context.user_message, &agent_response.content, context.language)
                        .await
                }
                None => None,
            }
        } else {
            None
        };

        if enhanced_response.is_some() {
            flow.should_end = true;
            flow.decision_type = DecisionType::ConversationComplete;
            flow.reason = "Response rewritten by quality enhancer".to_string();
        }

        Ok(SupervisorOutcome {
            is_complete: flow.should_end,
            needs_re_routing: flow.needs_re_routing,
            human_handoff_requested: flow.needs_human_handoff,
            evaluation,
            flow,
            enhanced_response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatMessage;

    struct NoClient;

    #[async_trait::async_trait]
    impl CompletionClient for NoClient {
        async fn complete(&self, _prompt: &str, _temperature: f32) -> Result<String, CompletionError> {
            unreachable!("enhancement disabled in these tests")
        }
    }

    fn supervisor() -> Supervisor<NoClient> {
        Supervisor::new(
            QualityEvaluator::new(Default::default()),
            MaxAttempts::try_new(2).unwrap(),
            0.7,
            None,
            false,
        )
    }

    #[tokio::test]
    async fn missing_agent_response_is_an_error() {
        let sup = supervisor();
        let context = TurnContext {
            user_message: "hola",
            agent_name: &AgentKey::try_new("product_agent").unwrap(),
            rag_had_results: false,
            error_count: Counter::default(),
            supervisor_retry_count: Counter::default(),
            agent_history: &[],
            messages: &[ChatMessage::user("hola")],
            language: "es",
        };
        let result = sup.evaluate_turn(&context).await;
        assert!(matches!(result, Err(SupervisorError::NoAgentResponse)));
    }

    #[tokio::test]
    async fn complete_response_finishes_the_turn() {
        let sup = supervisor();
        let agent = AgentKey::try_new("product_agent").unwrap();
        let context = TurnContext {
            user_message: "cual es el precio del producto",
            agent_name: &agent,
            rag_had_results: true,
            error_count: Counter::default(),
            supervisor_retry_count: Counter::default(),
            agent_history: &[agent.clone()],
            messages: &[
                ChatMessage::user("cual es el precio del producto"),
                ChatMessage::assistant(
                    "El producto cuesta $150 e incluye características como soporte técnico y garantía de un año.",
                    agent.clone(),
                ),
            ],
            language: "es",
        };
        let outcome = sup.evaluate_turn(&context).await.unwrap();
        assert!(outcome.is_complete);
        assert!(outcome.enhanced_response.is_none());
    }
}
