//! Construction and per-tenant enablement of workers (C7): a registration
//! table of constructors keyed by agent, built once at startup, with the
//! enabled set swapped per-request when a tenant registry is in play.
//!
//! Global/tenant dual-mode and the apply/reset pairing follow
//! `AgentFactory`/`TenantConfigManager` in `original_source`; the
//! `DashMap`-indexed instance cache follows the same registry pattern.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use thiserror::Error;

use crate::domain_types::AgentKey;
use crate::tenancy::{AgentConfig, AgentType, TenantAgentRegistry};

use super::worker::Worker;

/// Builds a fresh worker instance on first use; registered once per agent
/// key at startup. A closure rather than a trait object registry, so each
/// domain module can register its own workers without this crate needing
/// to name their concrete types.
pub type WorkerBuilder = Arc<dyn Fn() -> Arc<dyn Worker> + Send + Sync>;

/// Failure resolving an agent to a constructible worker.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// No builder was registered for this key; it is either misspelled in
    /// configuration or genuinely not implemented by this deployment.
    #[error("agent {0} has no registered constructor")]
    NoBuilder(AgentKey),

    /// The tenant configured a dynamically-loaded class for this agent.
    /// The original implementation resolves `agent_class` via Python's
    /// `importlib`; there is no equivalent dotted-path loading mechanism
    /// for a statically-linked Rust binary, so custom agents must be
    /// compiled in and registered like any other.
    #[error("custom agent classes are not dynamically loadable; register {0} at startup instead")]
    CustomAgentUnsupported(AgentKey),
}

/// Constructs and caches workers, and tracks which agent keys are
/// reachable for the current request: every registered agent in global
/// mode, or a tenant's `get_enabled_agents()` when a registry has been
/// applied.
pub struct AgentFactory {
    builders: HashMap<AgentKey, WorkerBuilder>,
    instances: DashMap<AgentKey, Arc<dyn Worker>>,
    global_enabled: HashSet<AgentKey>,
    tenant_enabled: Mutex<Option<HashSet<AgentKey>>>,
}

impl AgentFactory {
    /// Builds a factory from a registration table and the globally
    /// enabled agent keys (from configuration). No tenant registry is
    /// applied initially, so `is_enabled` checks `global_enabled` until
    /// `set_tenant_registry` is called.
    #[must_use]
    pub fn new(builders: HashMap<AgentKey, WorkerBuilder>, global_enabled: HashSet<AgentKey>) -> Self {
        Self {
            builders,
            instances: DashMap::new(),
            global_enabled,
            tenant_enabled: Mutex::new(None),
        }
    }

    /// Whether `agent_key` is reachable under the currently-applied
    /// configuration (tenant, if one is set, else global).
    #[must_use]
    pub fn is_enabled(&self, agent_key: &AgentKey) -> bool {
        match &*self.tenant_enabled.lock().expect("tenant_enabled mutex poisoned") {
            Some(enabled) => enabled.contains(agent_key),
            None => self.global_enabled.contains(agent_key),
        }
    }

    /// Returns the worker for `agent_key`, constructing and caching it on
    /// first use. `None` if the agent is disabled under the current
    /// configuration; use [`AgentFactory::build`] to distinguish "disabled"
    /// from "no such agent".
    #[must_use]
    pub fn get(&self, agent_key: &AgentKey) -> Option<Arc<dyn Worker>> {
        if !self.is_enabled(agent_key) {
            return None;
        }
        self.build(agent_key).ok()
    }

    /// Constructs (or returns the cached) worker for `agent_key`
    /// regardless of enablement, failing only if no constructor is
    /// registered.
    pub fn build(&self, agent_key: &AgentKey) -> Result<Arc<dyn Worker>, FactoryError> {
        if let Some(existing) = self.instances.get(agent_key) {
            return Ok(existing.clone());
        }
        let builder = self
            .builders
            .get(agent_key)
            .ok_or_else(|| FactoryError::NoBuilder(agent_key.clone()))?;
        let worker = builder();
        self.instances.insert(agent_key.clone(), worker.clone());
        Ok(worker)
    }

    /// Resolves a tenant-configured agent, refusing custom agent classes
    /// up front rather than silently falling back to a builtin.
    pub fn build_for_tenant_agent(&self, config: &AgentConfig) -> Result<Arc<dyn Worker>, FactoryError> {
        if config.agent_type == AgentType::Custom {
            return Err(FactoryError::CustomAgentUnsupported(config.agent_key.clone()));
        }
        self.build(&config.agent_key)
    }

    /// Every agent key reachable under the current configuration.
    #[must_use]
    pub fn enabled_agent_keys(&self) -> Vec<AgentKey> {
        match &*self.tenant_enabled.lock().expect("tenant_enabled mutex poisoned") {
            Some(enabled) => enabled.iter().cloned().collect(),
            None => self.global_enabled.iter().cloned().collect(),
        }
    }

    /// Switches the enabled set to `registry`'s, per-request. Paired with
    /// [`AgentFactory::reset_to_defaults`]; prefer [`TenantConfigGuard`]
    /// over calling these directly so the reset always runs.
    pub fn set_tenant_registry(&self, registry: &TenantAgentRegistry) {
        let enabled = registry
            .get_enabled_agents()
            .into_iter()
            .map(|agent| agent.agent_key.clone())
            .collect();
        *self.tenant_enabled.lock().expect("tenant_enabled mutex poisoned") = Some(enabled);
    }

    /// Reverts the enabled set to `global_enabled`.
    pub fn reset_to_defaults(&self) {
        *self.tenant_enabled.lock().expect("tenant_enabled mutex poisoned") = None;
    }
}

/// Applies a tenant's enabled-agent set for the lifetime of the guard,
/// reverting to global defaults on drop — including on an error or
/// panic-unwind path, so one tenant's configuration never leaks into the
/// next request handled by the same `AgentFactory`.
pub struct TenantConfigGuard<'a> {
    factory: &'a AgentFactory,
}

impl<'a> TenantConfigGuard<'a> {
    /// Applies `registry` to `factory` and returns a guard that resets it
    /// on drop.
    #[must_use]
    pub fn apply(factory: &'a AgentFactory, registry: &TenantAgentRegistry) -> Self {
        factory.set_tenant_registry(registry);
        Self { factory }
    }
}

impl Drop for TenantConfigGuard<'_> {
    fn drop(&mut self) {
        self.factory.reset_to_defaults();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::worker::WorkerError;
    use crate::state::{GraphState, GraphStateDelta};
    use async_trait::async_trait;

    struct EchoWorker(&'static str);

    #[async_trait]
    impl Worker for EchoWorker {
        async fn process(&self, _state: &GraphState) -> Result<GraphStateDelta, WorkerError> {
            Ok(GraphStateDelta::default())
        }

        fn agent_key(&self) -> &str {
            self.0
        }
    }

    fn factory_with_one_agent() -> AgentFactory {
        let mut builders: HashMap<AgentKey, WorkerBuilder> = HashMap::new();
        let key = AgentKey::try_new("greeting_agent").unwrap();
        builders.insert(key.clone(), Arc::new(|| Arc::new(EchoWorker("greeting_agent")) as Arc<dyn Worker>));
        let mut global_enabled = HashSet::new();
        global_enabled.insert(key);
        AgentFactory::new(builders, global_enabled)
    }

    #[test]
    fn disabled_agent_resolves_to_none() {
        let factory = factory_with_one_agent();
        let other = AgentKey::try_new("fallback_agent").unwrap();
        assert!(factory.get(&other).is_none());
    }

    #[test]
    fn enabled_agent_is_constructed_and_cached() {
        let factory = factory_with_one_agent();
        let key = AgentKey::try_new("greeting_agent").unwrap();
        let first = factory.get(&key).unwrap();
        let second = factory.get(&key).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn tenant_guard_narrows_then_restores_enabled_set() {
        let factory = factory_with_one_agent();
        let key = AgentKey::try_new("greeting_agent").unwrap();
        let tenant_registry = TenantAgentRegistry::new(None);
        {
            let _guard = TenantConfigGuard::apply(&factory, &tenant_registry);
            assert!(factory.get(&key).is_none());
        }
        assert!(factory.get(&key).is_some());
    }

    #[test]
    fn custom_agent_type_is_refused() {
        let factory = factory_with_one_agent();
        let mut config = AgentConfig::builtin(AgentKey::try_new("greeting_agent").unwrap(), "Greeting");
        config.agent_type = AgentType::Custom;
        let result = factory.build_for_tenant_agent(&config);
        assert!(matches!(result, Err(FactoryError::CustomAgentUnsupported(_))));
    }
}
