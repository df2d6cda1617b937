//! Graph state, its reducers, and the delta type nodes return.

pub mod graph_state;
pub mod reducers;

pub use graph_state::{ChatMessage, GraphState, GraphStateDelta, RagMetrics, RoutingStrategy, Sender};
