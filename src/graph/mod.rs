//! The graph engine (C8-C11): a fixed-topology state machine — orchestrator,
//! workers, supervisor — driven by pure routing decisions over an
//! algebraically-merged state.
//!
//! `router` holds the pure edge functions, `executor` the node bodies, and
//! `engine` the middleware that wires both to durable context and tenant
//! configuration for a single turn.

pub mod engine;
pub mod executor;
pub mod router;

pub use engine::{GraphEngine, GraphEngineError, GraphEvent, TurnRequest, TurnResult};
pub use executor::{ExecutorError, NodeExecutor, SupervisorStepOutcome};
pub use router::{ContinuationDecision, NextStep};
