//! # conversant - Multi-Agent Conversational Orchestration
//!
//! `conversant` is a multi-tenant engine for routing a conversation's turns
//! through a fixed topology of specialized agents: an orchestrator decides
//! which agent a message belongs to, a worker produces the response, and a
//! supervisor closes the loop by grading that response and deciding whether
//! the turn is done, needs another routing pass, or should escalate to a
//! human.
//!
//! ## Core components
//!
//! - **Intent routing** ([`intent`]): a three-tier analyzer cascade (LLM,
//!   local NLP, keyword) behind a deterministic cache, with flow-pinning so
//!   a multi-turn conversation stays with the agent already handling it.
//! - **Tenant configuration** ([`tenancy`]): which agents a tenant has
//!   enabled, and the bypass rules evaluated ahead of the intent cascade.
//! - **Workers** ([`agents`]): the construction and per-tenant enablement of
//!   the units of work the graph can route a turn to.
//! - **The supervisor** ([`supervisor`]): heuristic quality evaluation, flow
//!   control, and an optional LLM-backed response rewrite.
//! - **The graph engine** ([`graph`]): the state machine tying the above
//!   together for one turn, against durable, tiered conversation context
//!   ([`storage`]).
//!
//! ## Architecture
//!
//! The crate follows a functional-core/imperative-shell split throughout:
//! pure routing and merge logic ([`graph::router`], [`state`]) is free of
//! I/O, and the imperative shell ([`graph::engine`], [`storage`]) is where
//! durable state and tenant configuration are threaded in.
//!
//! ```no_run
//! use conversant::config::OrchestratorConfig;
//! use conversant::domain_types::{ConversationId, OrganizationId};
//! use conversant::graph::TurnRequest;
//!
//! # async fn example(engine: impl Fn() -> ()) {
//! let config = OrchestratorConfig::development();
//! let request = TurnRequest {
//!     conversation_id: ConversationId::generate(),
//!     organization_id: OrganizationId::generate(),
//!     user_message: "hola".to_string(),
//!     user_id: None,
//!     user_phone: None,
//!     whatsapp_phone_number_id: None,
//!     bypass_target_agent: None,
//! };
//! # let _ = (config, request);
//! # }
//! ```

pub mod agents;
pub mod config;
pub mod domain_types;
pub mod error;
pub mod graph;
pub mod intent;
pub mod state;
pub mod storage;
pub mod supervisor;
pub mod tenancy;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, OrchestratorResult};
pub use graph::{GraphEngine, TurnRequest, TurnResult};

// Common imports.
pub use ::tracing::{debug, error, info, instrument, warn};
pub use serde::{Deserialize, Serialize};
pub use std::collections::HashMap;
pub use std::time::Duration;
pub use thiserror::Error;
pub use tokio::time::timeout;
pub use uuid::Uuid;
