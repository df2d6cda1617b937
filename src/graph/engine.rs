//! The graph engine (C11): the middleware wrapping the fixed
//! orchestrator/worker/supervisor topology with tenant configuration,
//! durable context, and per-turn concurrency control.
//!
//! Grounded in `graph.py`'s `AynuxGraph.invoke`/`astream`: load context,
//! build the turn's initial state, drive the graph to completion, persist
//! context. Context-store writes happen only after the loop returns
//! successfully — a turn cancelled or timed out mid-flight leaves no
//! partial exchange behind, per the write-ordering invariant the source
//! system relies on for turn atomicity. `stream` additionally persists a
//! checkpoint (keyed by `conversation_id`, so repeated writes are
//! idempotent) after every node, for external progress observers; it is
//! not used to resume a cancelled turn.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use serde_json::Map;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{instrument, warn};

use crate::agents::{AgentFactory, TenantConfigGuard};
use crate::config::OrchestratorConfig;
use crate::domain_types::{AgentKey, ConversationId, OrganizationId};
use crate::state::{ChatMessage, GraphState};
use crate::storage::{ContextStore, ContextStoreError, ConversationContextDelta};
use crate::supervisor::CompletionClient;
use crate::tenancy::{BypassRulesLoader, RegistryError, RegistryLoader};

use super::executor::{ExecutorError, NodeExecutor};
use super::router::{route_to_agent, supervisor_should_continue, ContinuationDecision, NextStep};

/// Hard ceiling on worker invocations per turn (§5 backpressure), applied
/// regardless of what the supervisor or router would otherwise allow.
const MAX_WORKER_INVOCATIONS: u32 = 9;

const TIMEOUT_APOLOGY: &str =
    "Disculpa, esta consulta está tomando más tiempo de lo esperado. Un miembro de nuestro equipo te contactará en breve.";

const NO_RESPONSE_APOLOGY: &str = "Disculpa, no pude generar una respuesta para tu mensaje.";

/// Failures the graph engine cannot absorb into a degraded response.
#[derive(Debug, Error)]
pub enum GraphEngineError {
    /// The durable context store failed on a read or write path.
    #[error("context store error: {0}")]
    ContextStore(#[from] ContextStoreError),

    /// The tenant's agent registry or bypass rules could not be loaded.
    #[error("tenant registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A node body raised an error the executor could not absorb.
    #[error("node executor error: {0}")]
    Executor(#[from] ExecutorError),
}

/// One inbound turn: the message plus whatever channel identifiers the
/// caller has available for bypass matching and context seeding.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// The conversation this turn belongs to.
    pub conversation_id: ConversationId,
    /// The tenant this conversation belongs to.
    pub organization_id: OrganizationId,
    /// The user's message text.
    pub user_message: String,
    /// Caller-supplied user identifier, if any.
    pub user_id: Option<String>,
    /// The user's phone number, used for bypass matching and context.
    pub user_phone: Option<String>,
    /// The inbound WhatsApp Business phone number id, used for bypass
    /// matching.
    pub whatsapp_phone_number_id: Option<String>,
    /// A bypass target set by an upstream pre-router (§4.6 item 1), taking
    /// priority over tenant-configured bypass rules. Consumed at most once
    /// for this turn; it never persists across turns.
    pub bypass_target_agent: Option<AgentKey>,
}

/// The outcome of a completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    /// The conversation this result belongs to.
    pub conversation_id: ConversationId,
    /// The final response text shown to the user.
    pub response: String,
    /// Every agent invoked this turn, in order.
    pub agent_history: Vec<AgentKey>,
    /// Whether the turn reached a natural end.
    pub is_complete: bool,
    /// Whether the turn escalated to a human.
    pub human_handoff_requested: bool,
    /// Total turns completed in this conversation, including this one.
    pub total_turns: u32,
}

/// A progress event emitted by [`GraphEngine::stream`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    /// A node is about to run.
    NodeStarted {
        /// `"orchestrator"`, `"supervisor"`, or an agent key.
        node: String,
    },
    /// A node finished and its delta was merged into the turn's state.
    NodeFinished {
        /// `"orchestrator"`, `"supervisor"`, or an agent key.
        node: String,
    },
    /// The turn completed; no further events follow.
    Final(TurnResult),
    /// The turn failed; no further events follow.
    Error {
        /// The error, rendered for display.
        message: String,
    },
}

/// A step in the fixed graph topology the engine drives.
enum Node {
    Orchestrator,
    Worker(AgentKey),
    Supervisor,
    End,
}

impl Node {
    fn label(&self) -> String {
        match self {
            Node::Orchestrator => "orchestrator".to_string(),
            Node::Worker(key) => key.to_string(),
            Node::Supervisor => "supervisor".to_string(),
            Node::End => "end".to_string(),
        }
    }
}

/// Drives one turn through the fixed orchestrator/worker/supervisor
/// topology, serializing concurrent turns on the same conversation and
/// enforcing the whole-turn timeout budget.
pub struct GraphEngine<C: CompletionClient, S: ContextStore, R: RegistryLoader, B: BypassRulesLoader> {
    context_store: Arc<S>,
    registry_loader: Arc<R>,
    bypass_loader: Arc<B>,
    factory: Arc<AgentFactory>,
    node_executor: Arc<NodeExecutor<C>>,
    config: OrchestratorConfig,
    conversation_locks: DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl<C, S, R, B> GraphEngine<C, S, R, B>
where
    C: CompletionClient + 'static,
    S: ContextStore + 'static,
    R: RegistryLoader + 'static,
    B: BypassRulesLoader + 'static,
{
    /// Builds an engine from its dependencies and the configuration
    /// governing loop bounds, timeouts, and the two specially-routed
    /// agent keys.
    #[must_use]
    pub fn new(
        context_store: Arc<S>,
        registry_loader: Arc<R>,
        bypass_loader: Arc<B>,
        factory: Arc<AgentFactory>,
        node_executor: Arc<NodeExecutor<C>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            context_store,
            registry_loader,
            bypass_loader,
            factory,
            node_executor,
            config,
            conversation_locks: DashMap::new(),
        }
    }

    /// Runs one turn to completion, applying the whole-turn timeout
    /// budget and serializing against any other turn in flight for the
    /// same conversation.
    #[instrument(skip(self, request), fields(conversation_id = %request.conversation_id))]
    pub async fn invoke(&self, request: TurnRequest) -> Result<TurnResult, GraphEngineError> {
        let _lock = self.lock_for(request.conversation_id).await;
        let budget = Duration::from_millis(self.config.timeouts.turn_timeout_ms);
        match tokio::time::timeout(budget, self.execute_turn(&request, None)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("turn exceeded its timeout budget");
                self.timeout_result(&request).await
            }
        }
    }

    /// Runs one turn to completion like [`GraphEngine::invoke`], but
    /// yields a [`GraphEvent`] after every node so a caller can surface
    /// live progress (e.g. a typing indicator per step).
    pub fn stream(self: Arc<Self>, request: TurnRequest) -> impl Stream<Item = GraphEvent> + Send + 'static {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let _lock = self.lock_for(request.conversation_id).await;
            let budget = Duration::from_millis(self.config.timeouts.turn_timeout_ms);
            let result = match tokio::time::timeout(budget, self.execute_turn(&request, Some(&tx))).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("turn exceeded its timeout budget");
                    self.timeout_result(&request).await
                }
            };
            let event = match result {
                Ok(turn_result) => GraphEvent::Final(turn_result),
                Err(error) => GraphEvent::Error { message: error.to_string() },
            };
            let _ = tx.send(event).await;
        });

        futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) })
    }

    async fn lock_for(&self, conversation_id: ConversationId) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = self
            .conversation_locks
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    async fn execute_turn(
        &self,
        request: &TurnRequest,
        events: Option<&mpsc::Sender<GraphEvent>>,
    ) -> Result<TurnResult, GraphEngineError> {
        let registry = self.registry_loader.load_for_organization(request.organization_id).await?;
        let bypass_rules = self.bypass_loader.load_for_organization(request.organization_id).await?;
        let _guard = TenantConfigGuard::apply(&self.factory, &registry);

        let existing_context = self.context_store.get(request.conversation_id).await?;
        let last_agent = existing_context.as_ref().and_then(|context| context.last_agent.clone());
        let user_phone = request
            .user_phone
            .clone()
            .or_else(|| existing_context.as_ref().and_then(|context| context.user_phone.clone()));

        let mut state = GraphState::new_turn(request.conversation_id, request.organization_id, request.user_message.clone());
        state.user_id = request.user_id.clone();
        state.user_phone = user_phone;
        state.whatsapp_phone_number_id = request.whatsapp_phone_number_id.clone();
        // Seeds "the previous turn's agent" so flow-pin detection in the
        // orchestrator node has something to read; overwritten by the
        // orchestrator's own delta once it runs.
        state.current_agent = last_agent;

        // A caller may set `bypass_target_agent` directly on the request
        // (the common case: an upstream pre-router made the decision), or
        // the registry loader may have populated it on the per-request
        // registry itself (§3's home for it); either is consumed at most
        // once, with the request taking priority if somehow both are set.
        let bypass_target = request
            .bypass_target_agent
            .clone()
            .or_else(|| registry.bypass_target_agent.clone());

        let state = self
            .run_nodes(state, bypass_target, Some(&bypass_rules), events)
            .await?;

        let response = state
            .last_assistant_message_index()
            .map(|index| state.messages[index].content.clone())
            .unwrap_or_else(|| NO_RESPONSE_APOLOGY.to_string());

        let context_delta = ConversationContextDelta {
            organization_id: Some(request.organization_id),
            user_phone: state.user_phone.clone(),
            last_agent: state.current_agent.clone(),
            exchange: Some((request.user_message.clone(), response.clone())),
            ..Default::default()
        };
        let context = self.context_store.apply(request.conversation_id, context_delta).await?;
        self.context_store
            .append_message(request.conversation_id, &ChatMessage::user(request.user_message.clone()))
            .await?;
        self.context_store
            .append_message(
                request.conversation_id,
                &ChatMessage::assistant(response.clone(), state.current_agent.clone().unwrap_or_else(AgentKey::fallback)),
            )
            .await?;

        Ok(TurnResult {
            conversation_id: request.conversation_id,
            response,
            agent_history: state.agent_history,
            is_complete: state.is_complete,
            human_handoff_requested: state.human_handoff_requested,
            total_turns: context.total_turns,
        })
    }

    /// Drives `state` through the fixed topology: orchestrator routes to a
    /// worker (or bypass target); every worker but the greeting agent then
    /// visits the supervisor, which either ends the turn or routes back
    /// through the orchestrator. The greeting agent's edge goes straight to
    /// `End` — it never needs supervision (§4.11).
    async fn run_nodes(
        &self,
        mut state: GraphState,
        request_bypass_target: Option<AgentKey>,
        bypass_rules: Option<&crate::tenancy::BypassRules>,
        events: Option<&mpsc::Sender<GraphEvent>>,
    ) -> Result<GraphState, GraphEngineError> {
        let mut node = Node::Orchestrator;
        let mut worker_invocations: u32 = 0;
        // Taken on the orchestrator's first visit this turn, so a request
        // bypass is honored at most once even across re-routes that send
        // the turn back through the orchestrator (§8 invariant 9).
        let mut request_bypass_target = request_bypass_target;

        loop {
            if matches!(node, Node::End) {
                break;
            }

            let label = node.label();
            if let Some(tx) = events {
                let _ = tx.send(GraphEvent::NodeStarted { node: label.clone() }).await;
            }

            node = match node {
                Node::Orchestrator => {
                    let bypass_target = request_bypass_target.take();
                    let delta = self
                        .node_executor
                        .execute_orchestrator(&state, bypass_target.as_ref(), bypass_rules)
                        .await;
                    state = state.merge(delta);
                    match route_to_agent(&state, &self.factory) {
                        NextStep::Agent(agent) => Node::Worker(agent),
                        NextStep::End => Node::End,
                    }
                }
                Node::Worker(agent_key) => {
                    worker_invocations += 1;
                    let delta = self.node_executor.execute_worker(&state, &agent_key, &self.factory).await;
                    state = state.merge(delta);
                    if agent_key == self.config.routing.greeting_agent {
                        Node::End
                    } else {
                        Node::Supervisor
                    }
                }
                Node::Supervisor => {
                    let outcome = self.node_executor.execute_supervisor(&state).await?;
                    state = state.merge(outcome.delta);
                    if let Some(enhanced) = outcome.enhanced_response {
                        state = state.replace_last_assistant_message(enhanced);
                    }
                    debug_assert!(state.at_most_one_terminal_flag());
                    match supervisor_should_continue(
                        &state,
                        self.config.routing.max_routing_attempts,
                        self.config.routing.max_supervisor_retries,
                        self.config.routing.max_errors,
                    ) {
                        ContinuationDecision::Continue => Node::Orchestrator,
                        ContinuationDecision::End => Node::End,
                    }
                }
                Node::End => unreachable!("checked above"),
            };

            if let Some(tx) = events {
                let _ = tx.send(GraphEvent::NodeFinished { node: label }).await;
                self.persist_checkpoint(state.conversation_id, &state).await?;
            }

            if worker_invocations >= MAX_WORKER_INVOCATIONS {
                state.is_complete = true;
                state.human_handoff_requested = true;
                break;
            }
        }

        Ok(state)
    }

    /// Writes an idempotent-by-key progress snapshot mid-turn. Not used to
    /// resume a cancelled turn — cancellation discards partial state by
    /// design — only to let an external observer (e.g. an admin dashboard)
    /// see how far a streamed turn has gotten.
    async fn persist_checkpoint(&self, conversation_id: ConversationId, state: &GraphState) -> Result<(), GraphEngineError> {
        let mut metadata = Map::new();
        if let Ok(value) = serde_json::to_value(state) {
            metadata.insert("graph_checkpoint".to_string(), value);
        }
        let delta = ConversationContextDelta {
            organization_id: Some(state.organization_id),
            user_phone: state.user_phone.clone(),
            metadata,
            ..Default::default()
        };
        self.context_store.apply(conversation_id, delta).await?;
        Ok(())
    }

    async fn timeout_result(&self, request: &TurnRequest) -> Result<TurnResult, GraphEngineError> {
        let response = TIMEOUT_APOLOGY.to_string();
        let delta = ConversationContextDelta {
            organization_id: Some(request.organization_id),
            user_phone: request.user_phone.clone(),
            exchange: Some((request.user_message.clone(), response.clone())),
            ..Default::default()
        };
        let context = self.context_store.apply(request.conversation_id, delta).await?;
        Ok(TurnResult {
            conversation_id: request.conversation_id,
            response,
            agent_history: Vec::new(),
            is_complete: true,
            human_handoff_requested: true,
            total_turns: context.total_turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::worker::{Worker, WorkerError};
    use crate::agents::WorkerBuilder;
    use crate::intent::{IntentRouter, IntentValidator, KeywordIntentAnalyzer};
    use crate::storage::sqlite::SqliteContextStore;
    use crate::supervisor::{CompletionError, QualityEvaluator, Supervisor};
    use crate::tenancy::{RegistryError as TenancyRegistryError, TenantAgentRegistry};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};

    struct NoClient;

    #[async_trait]
    impl CompletionClient for NoClient {
        async fn complete(&self, _prompt: &str, _temperature: f32) -> Result<String, CompletionError> {
            unreachable!("enhancement disabled in these tests")
        }
    }

    struct GreetingWorker;

    #[async_trait]
    impl Worker for GreetingWorker {
        async fn process(&self, _state: &GraphState) -> Result<GraphStateDeltaAlias, WorkerError> {
            let mut delta = crate::state::GraphStateDelta::empty();
            delta.messages.push(ChatMessage::assistant(
                "hola, bienvenido",
                AgentKey::try_new("greeting_agent").unwrap(),
            ));
            Ok(delta)
        }

        fn agent_key(&self) -> &str {
            "greeting_agent"
        }
    }

    type GraphStateDeltaAlias = crate::state::GraphStateDelta;

    struct ProductWorker;

    #[async_trait]
    impl Worker for ProductWorker {
        async fn process(&self, _state: &GraphState) -> Result<GraphStateDeltaAlias, WorkerError> {
            let mut delta = crate::state::GraphStateDelta::empty();
            delta.messages.push(ChatMessage::assistant(
                "El producto cuesta $150 e incluye soporte técnico y garantía de un año.",
                AgentKey::try_new("product_agent").unwrap(),
            ));
            Ok(delta)
        }

        fn agent_key(&self) -> &str {
            "product_agent"
        }
    }

    struct StaticRegistryLoader;

    #[async_trait]
    impl RegistryLoader for StaticRegistryLoader {
        async fn load_for_organization(&self, organization_id: OrganizationId) -> Result<TenantAgentRegistry, TenancyRegistryError> {
            Ok(TenantAgentRegistry::new(Some(organization_id)))
        }
    }

    struct EmptyBypassLoader;

    #[async_trait]
    impl BypassRulesLoader for EmptyBypassLoader {
        async fn load_for_organization(
            &self,
            _organization_id: OrganizationId,
        ) -> Result<crate::tenancy::BypassRules, TenancyRegistryError> {
            Ok(crate::tenancy::BypassRules::new(Vec::new()))
        }
    }

    async fn store() -> Arc<SqliteContextStore> {
        Arc::new(SqliteContextStore::connect("sqlite::memory:").await.unwrap())
    }

    fn factory() -> Arc<AgentFactory> {
        let mut builders: HashMap<AgentKey, WorkerBuilder> = HashMap::new();
        let greeting = AgentKey::try_new("greeting_agent").unwrap();
        let product = AgentKey::try_new("product_agent").unwrap();
        builders.insert(greeting.clone(), Arc::new(|| Arc::new(GreetingWorker) as Arc<dyn Worker>));
        builders.insert(product.clone(), Arc::new(|| Arc::new(ProductWorker) as Arc<dyn Worker>));
        let mut enabled = HashSet::new();
        enabled.insert(greeting);
        enabled.insert(product);
        Arc::new(AgentFactory::new(builders, enabled))
    }

    fn node_executor() -> Arc<NodeExecutor<NoClient>> {
        let validator = Arc::new(IntentValidator::new(AgentKey::fallback()));
        let router = Arc::new(IntentRouter::new(
            None,
            None,
            Arc::new(KeywordIntentAnalyzer::new(validator.clone())),
            validator,
        ));
        let supervisor = Arc::new(Supervisor::new(
            QualityEvaluator::new(Default::default()),
            crate::domain_types::MaxAttempts::try_new(3).unwrap(),
            0.7,
            None,
            false,
        ));
        Arc::new(NodeExecutor::new(router, supervisor, "es", AgentKey::try_new("farewell_agent").unwrap()))
    }

    async fn engine() -> GraphEngine<NoClient, SqliteContextStore, StaticRegistryLoader, EmptyBypassLoader> {
        GraphEngine::new(
            store().await,
            Arc::new(StaticRegistryLoader),
            Arc::new(EmptyBypassLoader),
            factory(),
            node_executor(),
            OrchestratorConfig::testing(),
        )
    }

    fn request(conversation_id: ConversationId, organization_id: OrganizationId, message: &str) -> TurnRequest {
        TurnRequest {
            conversation_id,
            organization_id,
            user_message: message.to_string(),
            user_id: None,
            user_phone: None,
            whatsapp_phone_number_id: None,
            bypass_target_agent: None,
        }
    }

    #[tokio::test]
    async fn greeting_turn_completes_without_visiting_the_supervisor() {
        let engine = engine().await;
        let conversation_id = ConversationId::generate();
        let organization_id = OrganizationId::generate();
        let result = engine
            .invoke(request(conversation_id, organization_id, "hola buenos dias"))
            .await
            .unwrap();
        assert_eq!(result.agent_history, vec![AgentKey::try_new("greeting_agent").unwrap()]);
        assert!(result.is_complete);
        assert!(result.response.contains("bienvenido"));
    }

    #[tokio::test]
    async fn non_greeting_turn_visits_the_supervisor_and_completes() {
        let engine = engine().await;
        let conversation_id = ConversationId::generate();
        let organization_id = OrganizationId::generate();
        let result = engine
            .invoke(request(conversation_id, organization_id, "cual es el precio del producto"))
            .await
            .unwrap();
        assert_eq!(result.agent_history, vec![AgentKey::try_new("product_agent").unwrap()]);
        assert!(result.is_complete);
    }

    #[tokio::test]
    async fn request_bypass_routes_straight_to_the_named_agent() {
        let engine = engine().await;
        let conversation_id = ConversationId::generate();
        let organization_id = OrganizationId::generate();
        let mut turn = request(conversation_id, organization_id, "cualquier texto, no importa");
        turn.bypass_target_agent = Some(AgentKey::try_new("product_agent").unwrap());
        let result = engine.invoke(turn).await.unwrap();
        assert_eq!(result.agent_history, vec![AgentKey::try_new("product_agent").unwrap()]);
    }

    #[tokio::test]
    async fn second_turn_sees_the_first_turns_agent_via_context() {
        let engine = engine().await;
        let conversation_id = ConversationId::generate();
        let organization_id = OrganizationId::generate();
        engine
            .invoke(request(conversation_id, organization_id, "cual es el precio del producto"))
            .await
            .unwrap();
        let context = engine.context_store.get(conversation_id).await.unwrap().unwrap();
        assert_eq!(context.last_agent, Some(AgentKey::try_new("product_agent").unwrap()));
        assert_eq!(context.total_turns, 1);
    }

    #[tokio::test]
    async fn first_turn_persists_the_real_tenant_and_phone() {
        let engine = engine().await;
        let conversation_id = ConversationId::generate();
        let organization_id = OrganizationId::generate();
        let mut turn = request(conversation_id, organization_id, "hola buenos dias");
        turn.user_phone = Some("5492641234567".to_string());
        engine.invoke(turn).await.unwrap();

        let context = engine.context_store.get(conversation_id).await.unwrap().unwrap();
        assert_eq!(context.organization_id, organization_id);
        assert_eq!(context.user_phone.as_deref(), Some("5492641234567"));
    }

    #[tokio::test]
    async fn cross_turn_bypass_fallback_sees_the_persisted_phone() {
        let engine = engine().await;
        let conversation_id = ConversationId::generate();
        let organization_id = OrganizationId::generate();
        let mut first = request(conversation_id, organization_id, "hola buenos dias");
        first.user_phone = Some("5492641234567".to_string());
        engine.invoke(first).await.unwrap();

        let second = request(conversation_id, organization_id, "cual es el precio del producto");
        engine.invoke(second).await.unwrap();

        let context = engine.context_store.get(conversation_id).await.unwrap().unwrap();
        assert_eq!(context.user_phone.as_deref(), Some("5492641234567"));
    }
}
