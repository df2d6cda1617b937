//! Node bodies (C9): the three kinds of step the graph engine drives —
//! orchestrator, worker, supervisor — each translating its own dependency
//! (router, factory, supervisor) into a `GraphStateDelta`.
//!
//! Failures inside a worker are absorbed into a generic apology message
//! and an incremented error count rather than propagated, mirroring
//! `node_executor.py`'s `execute_agent`; a malformed turn that reaches the
//! supervisor with no agent response at all is a graph-wiring defect, not
//! a worker failure, so it propagates as `ExecutorError::Supervisor`.

use std::sync::Arc;

use thiserror::Error;
use tracing::{instrument, warn};

use crate::agents::AgentFactory;
use crate::domain_types::AgentKey;
use crate::intent::{AnalysisContext, ConversationSnapshot, IntentRouter};
use crate::state::{GraphState, GraphStateDelta, RagMetrics, RoutingStrategy};
use crate::supervisor::{CompletionClient, Supervisor, SupervisorError, TurnContext};
use crate::tenancy::BypassRules;

const GENERIC_APOLOGY: &str = "Disculpa, tuve un problema procesando tu solicitud. ¿Podrías intentar de nuevo?";

/// Failures a node body cannot absorb into the turn's own delta.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The supervisor found no agent response to evaluate — a graph
    /// wiring defect (a worker step was skipped), not a worker failure.
    #[error("supervisor could not evaluate this turn: {0}")]
    Supervisor(#[from] SupervisorError),
}

/// The result of a supervisor step: the usual merge delta, plus an
/// enhanced response text the engine must apply as a separate rewrite
/// after merging, since the delta/reducer system is append-only and
/// cannot express "replace message at index N".
pub struct SupervisorStepOutcome {
    /// Folded into the state via `GraphState::merge`.
    pub delta: GraphStateDelta,
    /// When set, the engine must call `replace_last_assistant_message`
    /// with this text immediately after merging `delta`.
    pub enhanced_response: Option<String>,
}

/// Executes the body of each node kind the fixed graph topology visits.
/// Holds the dependencies each kind needs; stateless beyond that, so a
/// single instance serves every turn.
pub struct NodeExecutor<C: CompletionClient> {
    router: Arc<IntentRouter>,
    supervisor: Arc<Supervisor<C>>,
    language: String,
    farewell_agent: AgentKey,
}

impl<C: CompletionClient> NodeExecutor<C> {
    /// Builds an executor around the shared router and supervisor, and
    /// the agent treated as ending the conversation outright.
    #[must_use]
    pub fn new(router: Arc<IntentRouter>, supervisor: Arc<Supervisor<C>>, language: impl Into<String>, farewell_agent: AgentKey) -> Self {
        Self {
            router,
            supervisor,
            language: language.into(),
            farewell_agent,
        }
    }

    /// Runs the orchestrator node: a request-level bypass target (set by an
    /// upstream pre-router, consumed at most once per turn — §4.6 item 1),
    /// else a tenant bypass rule (§4.6 item 2), else the intent cascade.
    /// Always produces a `next_agent`.
    #[instrument(skip(self, state, request_bypass_target, bypass_rules))]
    pub async fn execute_orchestrator(
        &self,
        state: &GraphState,
        request_bypass_target: Option<&AgentKey>,
        bypass_rules: Option<&BypassRules>,
    ) -> GraphStateDelta {
        let mut delta = GraphStateDelta::empty();
        delta.current_agent = Some(AgentKey::orchestrator());
        delta.routing_attempts = Some(state.routing_attempts.increment());

        if let Some(target) = request_bypass_target {
            delta.next_agent = Some(target.clone());
            delta.routing_strategy = Some(RoutingStrategy::Bypass);
            return delta;
        }

        if let Some(target) = bypass_rules.and_then(|rules| {
            rules.evaluate(state.user_phone.as_deref(), state.whatsapp_phone_number_id.as_deref())
        }) {
            delta.next_agent = Some(target.clone());
            delta.routing_strategy = Some(RoutingStrategy::Bypass);
            return delta;
        }

        let message = state.last_user_message().unwrap_or_default();
        // The engine seeds a fresh turn's `current_agent` with the prior
        // turn's last agent (from the durable conversation context) before
        // any node runs, so this is "last turn's agent", not "this turn's
        // in-progress node" — the one signal `check_active_flow` needs.
        let previous_agent = state.current_agent.as_ref().map(AgentKey::as_ref);
        let context = AnalysisContext {
            rolling_summary: None,
            last_bot_response: None,
            previous_agent,
            language: &self.language,
            user_tier: "default",
        };
        let conversation = ConversationSnapshot { previous_agent };

        let result = self.router.determine_intent(message, context, conversation).await;
        delta.next_agent = Some(result.target_agent);
        delta.routing_strategy = Some(RoutingStrategy::Cascade);
        delta
    }

    /// Runs a worker node: dispatches to its `Worker`, absorbing both a
    /// missing registration and a processing failure into an apology
    /// rather than ending the turn with a hard error. The farewell agent
    /// always ends the conversation on success, mirroring the source
    /// system's special case for it.
    #[instrument(skip(self, state, factory))]
    pub async fn execute_worker(&self, state: &GraphState, agent_key: &AgentKey, factory: &AgentFactory) -> GraphStateDelta {
        let Some(worker) = factory.get(agent_key) else {
            warn!(%agent_key, "no worker registered or enabled for this agent");
            return self.apology_delta(state, agent_key);
        };

        let mut delta = match worker.process(state).await {
            Ok(delta) => delta,
            Err(error) => {
                warn!(%agent_key, %error, "worker failed processing this turn");
                return self.apology_delta(state, agent_key);
            }
        };

        delta.current_agent = Some(agent_key.clone());
        delta.agent_history.push(agent_key.clone());
        if *agent_key == self.farewell_agent {
            delta.is_complete = Some(true);
        }
        delta
    }

    fn apology_delta(&self, state: &GraphState, agent_key: &AgentKey) -> GraphStateDelta {
        let mut delta = GraphStateDelta::apology(GENERIC_APOLOGY, state.error_count.increment(), Some(agent_key.clone()));
        delta.current_agent = Some(agent_key.clone());
        delta.agent_history.push(agent_key.clone());
        delta
    }

    /// Runs the supervisor node: evaluates the turn's last response,
    /// decides the flow outcome, and conditionally rewrites it. The
    /// returned `enhanced_response`, if any, must be applied by the
    /// caller after merging `delta`.
    #[instrument(skip(self, state))]
    pub async fn execute_supervisor(&self, state: &GraphState) -> Result<SupervisorStepOutcome, ExecutorError> {
        let agent_name = state.current_agent.clone().unwrap_or_else(AgentKey::fallback);
        let context = TurnContext {
            user_message: state.last_user_message().unwrap_or_default(),
            agent_name: &agent_name,
            rag_had_results: state.rag_metrics.as_ref().is_some_and(RagMetrics::had_results),
            error_count: state.error_count,
            supervisor_retry_count: state.supervisor_retry_count,
            agent_history: &state.agent_history,
            messages: &state.messages,
            language: &self.language,
        };

        let outcome = self.supervisor.evaluate_turn(&context).await?;

        let mut delta = GraphStateDelta::empty();
        delta.current_agent = Some(AgentKey::supervisor());
        delta.supervisor_evaluation = Some(outcome.evaluation);
        delta.conversation_flow = Some(outcome.flow);
        delta.is_complete = Some(outcome.is_complete);
        delta.needs_re_routing = Some(outcome.needs_re_routing);
        delta.human_handoff_requested = Some(outcome.human_handoff_requested);
        delta.supervisor_retry_count = Some(state.supervisor_retry_count.increment());

        if outcome.needs_re_routing {
            delta.routing_attempts = Some(state.routing_attempts.increment());
            delta.next_agent = Some(AgentKey::orchestrator());
        }

        if outcome.human_handoff_requested {
            delta.is_complete = Some(true);
        }

        Ok(SupervisorStepOutcome {
            delta,
            enhanced_response: outcome.enhanced_response,
        })
    }
}
