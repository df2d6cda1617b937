//! Per-tenant agent configuration and request-time routing overrides
//! (C6): the registry of which agents a tenant has enabled, the derived
//! intent/keyword indexes built from it, and the bypass rules evaluated
//! ahead of normal intent routing.

pub mod bypass;
pub mod loader;
pub mod registry;

pub use bypass::{BypassRule, BypassRuleType, BypassRules};
pub use loader::{BypassRulesLoader, RegistryLoader};
pub use registry::{AgentConfig, AgentType, IntentPattern, TenantAgentRegistry};

use thiserror::Error;

/// Errors building or loading a tenant's agent registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The durable store could not be reached or returned malformed data.
    #[error("failed to load tenant registry for organization {organization_id}: {reason}")]
    LoadFailed {
        /// The organization whose registry failed to load.
        organization_id: crate::domain_types::OrganizationId,
        /// What went wrong, for logging.
        reason: String,
    },
}
