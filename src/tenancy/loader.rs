//! Loading a tenant's registry from wherever it is durably stored.
//! Kept as a trait so callers can inject a database-backed
//! implementation without this crate depending on a particular schema.

use async_trait::async_trait;

use crate::domain_types::OrganizationId;

use super::{BypassRules, RegistryError, TenantAgentRegistry};

/// Builds a `TenantAgentRegistry` for a given organization, fresh per
/// request so configuration changes take effect immediately.
#[async_trait]
pub trait RegistryLoader: Send + Sync {
    /// Loads the registry for `organization_id`. A durable-store failure
    /// here is always the caller's to handle — unlike the intent
    /// analyzers, there is no sensible low-confidence degrade for "we
    /// don't know which agents this tenant has enabled".
    async fn load_for_organization(&self, organization_id: OrganizationId) -> Result<TenantAgentRegistry, RegistryError>;
}

/// Loads a tenant's bypass rules, evaluated ahead of the intent cascade.
/// Kept separate from `RegistryLoader` since bypass rules and agent
/// configuration are independently administered (see the bypass rule
/// schema), even though both are commonly backed by the same database.
#[async_trait]
pub trait BypassRulesLoader: Send + Sync {
    /// Loads the bypass rule set for `organization_id`, empty if the
    /// tenant has configured none.
    async fn load_for_organization(&self, organization_id: OrganizationId) -> Result<BypassRules, RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory loader for tests: organizations not in the map load
    /// an empty, bypass-free registry rather than erroring, mirroring the
    /// "no tenant context, use global mode" degrade.
    pub struct StaticRegistryLoader {
        registries: Mutex<HashMap<OrganizationId, TenantAgentRegistry>>,
    }

    impl StaticRegistryLoader {
        pub fn new(registries: HashMap<OrganizationId, TenantAgentRegistry>) -> Self {
            Self {
                registries: Mutex::new(registries),
            }
        }
    }

    #[async_trait]
    impl RegistryLoader for StaticRegistryLoader {
        async fn load_for_organization(&self, organization_id: OrganizationId) -> Result<TenantAgentRegistry, RegistryError> {
            let registries = self.registries.lock().expect("registry mutex poisoned");
            Ok(registries
                .get(&organization_id)
                .cloned()
                .unwrap_or_else(|| TenantAgentRegistry::new(Some(organization_id))))
        }
    }

    #[tokio::test]
    async fn unknown_organization_loads_empty_registry() {
        let loader = StaticRegistryLoader::new(HashMap::new());
        let org = OrganizationId::generate();
        let registry = loader.load_for_organization(org).await.unwrap();
        assert!(registry.agents.is_empty());
        assert_eq!(registry.organization_id, Some(org));
    }

    #[tokio::test]
    async fn configured_organization_loads_its_registry() {
        let org = OrganizationId::generate();
        let mut registries = HashMap::new();
        registries.insert(org, TenantAgentRegistry::new(Some(org)));
        let loader = StaticRegistryLoader::new(registries);
        let registry = loader.load_for_organization(org).await.unwrap();
        assert_eq!(registry.organization_id, Some(org));
    }
}
