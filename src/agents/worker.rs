//! The trait every non-system node in the graph implements (C7).

use async_trait::async_trait;
use thiserror::Error;

use crate::state::{GraphState, GraphStateDelta};

/// A unit of work the graph can route a turn to: a greeting, a domain
/// agent, a fallback — anything that isn't the orchestrator or
/// supervisor. Implementations never mutate `GraphState` directly; they
/// return the delta the node executor folds in.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Processes the current turn and returns the state delta this worker
    /// contributes. Errors are the worker's own failures (model call
    /// failed, retrieval backend unreachable); routing/state-machine
    /// concerns belong to the node executor, not here.
    async fn process(&self, state: &GraphState) -> Result<GraphStateDelta, WorkerError>;

    /// The agent key this worker is registered under, for logging.
    fn agent_key(&self) -> &str;
}

/// Failure raised by a worker's own processing step.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker's backend (model, retrieval store, integration) failed.
    #[error("worker backend failed: {0}")]
    BackendFailed(String),

    /// The worker received a turn it cannot act on (e.g. no user message).
    #[error("worker cannot process this turn: {0}")]
    InvalidTurn(String),
}
