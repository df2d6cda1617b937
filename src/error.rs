//! Crate-wide error type.
//!
//! Each subsystem defines its own error enum (see `storage`, `intent`,
//! `tenancy`, `graph`, `supervisor`); this type is the conversion target at
//! the public API boundary. Transient failures are caught and degraded at
//! the subsystem boundary per the error-handling design and never reach
//! here.

use thiserror::Error;

use crate::graph::{ExecutorError, GraphEngineError};
use crate::intent::RouterError;
use crate::storage::ContextStoreError;
use crate::supervisor::SupervisorError;
use crate::tenancy::RegistryError;

/// Top-level error for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Context store failed on a write path that cannot be degraded.
    #[error("context store error: {0}")]
    ContextStore(#[from] ContextStoreError),

    /// Tenant registry could not be loaded or built for the request.
    #[error("tenant registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The intent router failed after exhausting its cascade.
    #[error("intent router error: {0}")]
    Router(#[from] RouterError),

    /// Node execution failed in a way the executor could not absorb.
    #[error("node executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// The supervisor failed to evaluate a turn.
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// The graph engine failed to compile or run.
    #[error("graph engine error: {0}")]
    Engine(#[from] GraphEngineError),

    /// The whole-turn budget elapsed before the engine returned.
    #[error("turn timed out after {0:?}")]
    TurnTimeout(std::time::Duration),

    /// Invalid configuration supplied at construction.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Convenience alias used throughout the crate's public surface.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
