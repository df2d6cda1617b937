//! Pure routing decisions (C8): where the graph engine sends a turn next,
//! given only the current state and the set of agents presently enabled.
//! No I/O, no mutation — the engine calls these between node executions.

use crate::agents::AgentFactory;
use crate::domain_types::{AgentKey, Counter, MaxAttempts};
use crate::state::GraphState;
use crate::supervisor::DecisionType;

/// Where `route_to_agent` sends the turn next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// Dispatch to this agent's worker.
    Agent(AgentKey),
    /// The graph has nothing left to route; end the turn.
    End,
}

/// Whether the supervisor loop continues or ends the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationDecision {
    /// Route back through the orchestrator for another worker pass.
    Continue,
    /// The turn is over.
    End,
}

/// Determines the next worker to run, falling back to `fallback_agent`
/// when `state.next_agent` is unset or names an agent this request can't
/// reach (disabled for the tenant, or never registered at all). System
/// agents (orchestrator, supervisor) are always considered reachable.
#[must_use]
pub fn route_to_agent(state: &GraphState, factory: &AgentFactory) -> NextStep {
    if state.is_complete || state.human_handoff_requested {
        return NextStep::End;
    }

    let Some(next_agent) = &state.next_agent else {
        return NextStep::Agent(AgentKey::fallback());
    };

    if next_agent.is_system() || factory.is_enabled(next_agent) {
        NextStep::Agent(next_agent.clone())
    } else {
        NextStep::Agent(AgentKey::fallback())
    }
}

/// Decides whether the turn continues after the supervisor's pass, per
/// the completion flags, retry/error budgets, and the flow controller's
/// own decision, in that order.
#[must_use]
pub fn supervisor_should_continue(
    state: &GraphState,
    max_routing_attempts: MaxAttempts,
    max_supervisor_retries: MaxAttempts,
    max_errors: MaxAttempts,
) -> ContinuationDecision {
    if state.is_complete || state.human_handoff_requested {
        return ContinuationDecision::End;
    }

    if state.needs_re_routing {
        return if counter_reached(state.routing_attempts, max_routing_attempts)
            || counter_reached(state.supervisor_retry_count, max_supervisor_retries)
        {
            ContinuationDecision::End
        } else {
            ContinuationDecision::Continue
        };
    }

    if counter_reached(state.error_count, max_errors) {
        return ContinuationDecision::End;
    }

    match state.conversation_flow.as_ref().map(|flow| flow.decision_type) {
        Some(DecisionType::ReRoute) => ContinuationDecision::Continue,
        Some(DecisionType::ConversationComplete | DecisionType::ConversationEnd | DecisionType::HumanHandoff) => {
            ContinuationDecision::End
        }
        None => ContinuationDecision::End,
    }
}

fn counter_reached(counter: Counter, max: MaxAttempts) -> bool {
    u32::from(counter) >= u32::from(u8::from(max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{ConversationId, OrganizationId};
    use crate::supervisor::ConversationFlow;
    use std::collections::{HashMap, HashSet};

    fn empty_factory() -> AgentFactory {
        AgentFactory::new(HashMap::new(), HashSet::new())
    }

    fn base_state() -> GraphState {
        GraphState::new_turn(ConversationId::generate(), OrganizationId::generate(), "hola")
    }

    #[test]
    fn completion_flag_ends_routing() {
        let factory = empty_factory();
        let mut state = base_state();
        state.is_complete = true;
        assert_eq!(route_to_agent(&state, &factory), NextStep::End);
    }

    #[test]
    fn missing_next_agent_routes_to_fallback() {
        let factory = empty_factory();
        let state = base_state();
        assert_eq!(route_to_agent(&state, &factory), NextStep::Agent(AgentKey::fallback()));
    }

    #[test]
    fn disabled_agent_routes_to_fallback() {
        let factory = empty_factory();
        let mut state = base_state();
        state.next_agent = Some(AgentKey::try_new("greeting_agent").unwrap());
        assert_eq!(route_to_agent(&state, &factory), NextStep::Agent(AgentKey::fallback()));
    }

    #[test]
    fn system_agent_is_always_reachable() {
        let factory = empty_factory();
        let mut state = base_state();
        state.next_agent = Some(AgentKey::supervisor());
        assert_eq!(route_to_agent(&state, &factory), NextStep::Agent(AgentKey::supervisor()));
    }

    #[test]
    fn enabled_agent_routes_through() {
        let key = AgentKey::try_new("greeting_agent").unwrap();
        let mut global_enabled = HashSet::new();
        global_enabled.insert(key.clone());
        let factory = AgentFactory::new(HashMap::new(), global_enabled);
        let mut state = base_state();
        state.next_agent = Some(key.clone());
        assert_eq!(route_to_agent(&state, &factory), NextStep::Agent(key));
    }

    #[test]
    fn re_routing_ends_once_attempts_exhausted() {
        let mut state = base_state();
        state.needs_re_routing = true;
        state.routing_attempts = Counter::new(3);
        let max = MaxAttempts::try_new(3).unwrap();
        assert_eq!(
            supervisor_should_continue(&state, max, max, max),
            ContinuationDecision::End
        );
    }

    #[test]
    fn re_routing_continues_under_budget() {
        let mut state = base_state();
        state.needs_re_routing = true;
        state.routing_attempts = Counter::new(1);
        let max = MaxAttempts::try_new(3).unwrap();
        assert_eq!(
            supervisor_should_continue(&state, max, max, max),
            ContinuationDecision::Continue
        );
    }

    #[test]
    fn re_route_flow_decision_continues() {
        let mut state = base_state();
        state.conversation_flow = Some(ConversationFlow {
            decision_type: DecisionType::ReRoute,
            should_end: false,
            needs_re_routing: true,
            needs_human_handoff: false,
            reason: "low confidence".to_string(),
        });
        let max = MaxAttempts::default();
        assert_eq!(
            supervisor_should_continue(&state, max, max, max),
            ContinuationDecision::Continue
        );
    }

    #[test]
    fn no_flow_decision_ends_the_turn() {
        let state = base_state();
        let max = MaxAttempts::default();
        assert_eq!(
            supervisor_should_continue(&state, max, max, max),
            ContinuationDecision::End
        );
    }
}
