//! Conversation flow control (C10b): turns a quality evaluation into a
//! decision about whether the turn ends, loops back for a re-route, or
//! escalates to a human.

use serde::{Deserialize, Serialize};

use super::quality_evaluator::{QualityEvaluation, SuggestedAction};
use crate::domain_types::{AgentKey, Counter, MaxAttempts};

/// Why the flow controller decided what it decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    /// Escalating to a human operator.
    HumanHandoff,
    /// The turn is done; the response is good enough.
    ConversationComplete,
    /// Loop back to the orchestrator for another worker.
    ReRoute,
    /// The turn is done for a reason other than quality acceptance.
    ConversationEnd,
}

/// The flow controller's decision for this turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationFlow {
    /// The kind of decision made.
    pub decision_type: DecisionType,
    /// Whether the turn should end (`false` only for `ReRoute`).
    pub should_end: bool,
    /// Set when the controller wants another routing pass.
    pub needs_re_routing: bool,
    /// Set when the controller wants to escalate to a human.
    pub needs_human_handoff: bool,
    /// Human-readable justification, useful for logs and admin surfaces.
    pub reason: String,
}

/// Context the flow controller needs beyond the quality evaluation itself.
pub struct FlowContext<'a> {
    /// Errors absorbed so far this turn.
    pub error_count: Counter,
    /// Supervisor retries so far this turn.
    pub supervisor_retry_count: Counter,
    /// Every agent invoked so far this turn.
    pub agent_history: &'a [AgentKey],
    /// The last few user messages, most recent last, scanned for
    /// frustration keywords.
    pub recent_user_messages: &'a [String],
}

const FRUSTRATION_KEYWORDS: &[&str] = &[
    "no funciona",
    "terrible",
    "pésimo",
    "queja",
    "reclamo",
    "gerente",
    "supervisor",
    "no sirve",
    "horrible",
    "malo",
];

/// Scans the last two user messages for frustration keywords.
#[must_use]
pub fn detect_user_frustration(recent_user_messages: &[String]) -> bool {
    recent_user_messages
        .iter()
        .rev()
        .take(2)
        .any(|msg| {
            let lower = msg.to_lowercase();
            FRUSTRATION_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
}

/// Controls conversation flow based on quality evaluations.
pub struct FlowController {
    quality_threshold: f64,
    max_retries: MaxAttempts,
}

impl FlowController {
    /// Builds a controller with the given acceptance threshold and retry cap.
    #[must_use]
    pub fn new(quality_threshold: f64, max_retries: MaxAttempts) -> Self {
        Self {
            quality_threshold,
            max_retries,
        }
    }

    fn needs_human_handoff(&self, evaluation: &QualityEvaluation, context: &FlowContext<'_>) -> bool {
        if context.error_count.at_least(self.max_retries)
            || context.supervisor_retry_count.at_least(self.max_retries)
        {
            return true;
        }
        if f64::from(evaluation.overall_score.into_inner()) < 0.3 {
            return true;
        }
        detect_user_frustration(context.recent_user_messages)
    }

    fn should_reroute(&self, context: &FlowContext<'_>, rag_had_results: bool) -> bool {
        if !rag_had_results {
            return false;
        }
        let history = context.agent_history;
        if history.len() >= 2 && history[history.len() - 1] == history[history.len() - 2] {
            return false;
        }
        true
    }

    /// Decides the flow outcome for this turn, given the quality evaluation
    /// and the turn's counters/history.
    #[must_use]
    pub fn determine_flow(&self, evaluation: &QualityEvaluation, context: &FlowContext<'_>) -> ConversationFlow {
        if self.needs_human_handoff(evaluation, context) {
            return ConversationFlow {
                decision_type: DecisionType::HumanHandoff,
                should_end: true,
                needs_re_routing: false,
                needs_human_handoff: true,
                reason: "Response quality below threshold or user frustration detected".to_string(),
            };
        }

        let overall = f64::from(evaluation.overall_score.into_inner());

        if matches!(
            evaluation.suggested_action,
            SuggestedAction::Accept | SuggestedAction::StopRetry
        ) {
            let reason = match evaluation.suggested_action {
                SuggestedAction::StopRetry => {
                    format!("Category: {:?}, re-routing would not help (score {overall:.2})", evaluation.category)
                }
                _ => format!("Category: {:?}, score: {overall:.2}", evaluation.category),
            };
            return ConversationFlow {
                decision_type: DecisionType::ConversationComplete,
                should_end: true,
                needs_re_routing: false,
                needs_human_handoff: false,
                reason,
            };
        }

        if evaluation.suggested_action == SuggestedAction::ReRoute {
            if !self.should_reroute(context, evaluation.rag_had_results) {
                return ConversationFlow {
                    decision_type: DecisionType::ConversationComplete,
                    should_end: true,
                    needs_re_routing: false,
                    needs_human_handoff: false,
                    reason: format!("Re-routing would not help (category: {:?})", evaluation.category),
                };
            }
            return ConversationFlow {
                decision_type: DecisionType::ReRoute,
                should_end: false,
                needs_re_routing: true,
                needs_human_handoff: false,
                reason: format!("Low quality ({:?}), attempting re-route", evaluation.category),
            };
        }

        if overall >= self.quality_threshold {
            return ConversationFlow {
                decision_type: DecisionType::ConversationComplete,
                should_end: true,
                needs_re_routing: false,
                needs_human_handoff: false,
                reason: format!("High quality response (score: {overall:.2})"),
            };
        }

        ConversationFlow {
            decision_type: DecisionType::ConversationEnd,
            should_end: true,
            needs_re_routing: false,
            needs_human_handoff: false,
            reason: format!("Default end (score: {overall:.2}, category: {:?})", evaluation.category),
        }
    }

    /// Whether the supervisor should provide a final response now rather
    /// than attempt a re-route, independent of `determine_flow`'s own
    /// decision — used when a caller wants a quick accept/continue signal.
    #[must_use]
    pub fn should_provide_final_response(&self, evaluation: &QualityEvaluation, context: &FlowContext<'_>) -> bool {
        let overall = f64::from(evaluation.overall_score.into_inner());
        if overall >= self.quality_threshold {
            return true;
        }
        if context.supervisor_retry_count.into_inner() >= u32::from(self.max_retries.into_inner()) {
            return true;
        }
        if overall >= 0.5 {
            return true;
        }
        context.error_count.into_inner() >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::UnitScore;
    use crate::supervisor::quality_evaluator::{QueryType, ResponseCategory};

    fn eval(overall: f64, action: SuggestedAction, rag: bool) -> QualityEvaluation {
        QualityEvaluation {
            overall_score: UnitScore::clamped(overall),
            completeness_score: UnitScore::zero(),
            relevance_score: UnitScore::zero(),
            clarity_score: UnitScore::zero(),
            helpfulness_score: UnitScore::zero(),
            agent_name: AgentKey::try_new("product_agent").unwrap(),
            response_length: 10,
            category: ResponseCategory::PartialInfo,
            suggested_action: action,
            fallback_score: UnitScore::zero(),
            rag_had_results: rag,
            query_type: QueryType::General,
        }
    }

    #[test]
    fn frustration_keywords_trigger_handoff() {
        let controller = FlowController::new(0.7, MaxAttempts::try_new(3).unwrap());
        let evaluation = eval(0.9, SuggestedAction::Accept, true);
        let context = FlowContext {
            error_count: Counter::default(),
            supervisor_retry_count: Counter::default(),
            agent_history: &[],
            recent_user_messages: &["no sirve".to_string(), "quiero un supervisor".to_string()],
        };
        let flow = controller.determine_flow(&evaluation, &context);
        assert!(flow.needs_human_handoff);
        assert!(flow.should_end);
    }

    #[test]
    fn reroute_without_rag_results_ends_instead() {
        let controller = FlowController::new(0.7, MaxAttempts::try_new(3).unwrap());
        let evaluation = eval(0.4, SuggestedAction::ReRoute, false);
        let context = FlowContext {
            error_count: Counter::default(),
            supervisor_retry_count: Counter::default(),
            agent_history: &[],
            recent_user_messages: &[],
        };
        let flow = controller.determine_flow(&evaluation, &context);
        assert_eq!(flow.decision_type, DecisionType::ConversationComplete);
        assert!(!flow.needs_re_routing);
    }

    #[test]
    fn reroute_with_rag_results_continues() {
        let controller = FlowController::new(0.7, MaxAttempts::try_new(3).unwrap());
        let evaluation = eval(0.4, SuggestedAction::ReRoute, true);
        let context = FlowContext {
            error_count: Counter::default(),
            supervisor_retry_count: Counter::default(),
            agent_history: &[],
            recent_user_messages: &[],
        };
        let flow = controller.determine_flow(&evaluation, &context);
        assert_eq!(flow.decision_type, DecisionType::ReRoute);
        assert!(flow.needs_re_routing);
        assert!(!flow.should_end);
    }
}
