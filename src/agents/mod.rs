//! Workers and their construction (C7): the `Worker` trait every
//! non-system node implements, and the `AgentFactory` that builds and
//! enables them, globally or per-tenant.

pub mod factory;
pub mod worker;

pub use factory::{AgentFactory, FactoryError, TenantConfigGuard, WorkerBuilder};
pub use worker::{Worker, WorkerError};
