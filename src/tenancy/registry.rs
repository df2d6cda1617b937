//! The tenant agent registry itself: per-tenant agent configuration plus
//! the intent/keyword indexes derived from it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain_types::{AgentKey, OrganizationId, Priority, UnitScore};

/// What kind of agent a configuration entry describes; `Custom` and
/// `Domain`/`Specialized` agents are dynamically loaded (see C7),
/// `Builtin` agents are always available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Shipped with the orchestrator, always constructible.
    Builtin,
    /// Loaded dynamically from a tenant-supplied class path.
    Custom,
    /// A builtin agent scoped to one business domain.
    Domain,
    /// A builtin agent with narrower, specialized behavior.
    Specialized,
}

/// A pattern used to route an intent to this agent, with a weight for
/// breaking ties when more than one agent's patterns match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentPattern {
    /// The intent label this pattern matches.
    pub pattern: String,
    /// Relative weight when multiple agents list the same pattern.
    pub weight: UnitScore,
    /// Whether this pattern requires conversation context to apply.
    pub requires_context: bool,
}

impl IntentPattern {
    /// Builds a pattern with the default weight (`1.0`) and no context
    /// requirement.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            weight: UnitScore::clamped(1.0),
            requires_context: false,
        }
    }
}

/// Runtime configuration for a single agent, loaded from the tenant's
/// durable configuration and merged with builtin defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// The agent's registry key.
    pub agent_key: AgentKey,
    /// Builtin, custom, domain, or specialized.
    pub agent_type: AgentType,
    /// Human-readable name.
    pub display_name: String,
    /// Longer description, surfaced in admin tooling.
    pub description: Option<String>,
    /// Dotted class path for dynamically-loaded custom agents.
    pub agent_class: Option<String>,
    /// Whether this agent is reachable at all for this tenant.
    pub enabled: bool,
    /// Routing priority; higher is evaluated first on ties.
    pub priority: Priority,
    /// The business domain this agent belongs to, if any.
    pub domain_key: Option<String>,
    /// Keywords this agent should be discoverable by.
    pub keywords: Vec<String>,
    /// Intent patterns this agent should be routed to on.
    pub intent_patterns: Vec<IntentPattern>,
    /// Free-form agent-specific configuration (prompts, model settings).
    pub config: Map<String, Value>,
}

impl AgentConfig {
    /// Builds a minimal builtin agent configuration with no keywords or
    /// intent patterns; callers append those separately.
    #[must_use]
    pub fn builtin(agent_key: AgentKey, display_name: impl Into<String>) -> Self {
        Self {
            agent_key,
            agent_type: AgentType::Builtin,
            display_name: display_name.into(),
            description: None,
            agent_class: None,
            enabled: true,
            priority: Priority::default(),
            domain_key: None,
            keywords: Vec::new(),
            intent_patterns: Vec::new(),
            config: Map::new(),
        }
    }
}

/// A tenant's complete agent registry: every configured agent plus the
/// indexes derived from it. Rebuilt from scratch per request rather than
/// cached across requests, so a configuration change takes effect on the
/// very next turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantAgentRegistry {
    /// The tenant this registry belongs to. `None` in global (no
    /// multi-tenancy) mode.
    pub organization_id: Option<OrganizationId>,
    /// Every configured agent, keyed by its registry key.
    pub agents: HashMap<AgentKey, AgentConfig>,
    /// Derived: intent label -> the highest-priority enabled agent that
    /// claims it.
    pub intent_to_agent: HashMap<String, AgentKey>,
    /// Derived: lowercased keyword -> every enabled agent that lists it.
    pub keyword_index: HashMap<String, Vec<AgentKey>>,
    /// Set when a bypass rule matched ahead of normal routing; overrides
    /// the intent cascade entirely for this request.
    pub bypass_target_agent: Option<AgentKey>,
}

impl TenantAgentRegistry {
    /// Builds an empty registry for `organization_id` and rebuilds its
    /// (empty) indexes.
    #[must_use]
    pub fn new(organization_id: Option<OrganizationId>) -> Self {
        let mut registry = Self {
            organization_id,
            agents: HashMap::new(),
            intent_to_agent: HashMap::new(),
            keyword_index: HashMap::new(),
            bypass_target_agent: None,
        };
        registry.rebuild_indexes();
        registry
    }

    /// Inserts or replaces an agent's configuration and rebuilds the
    /// derived indexes.
    pub fn set_agent(&mut self, config: AgentConfig) {
        self.agents.insert(config.agent_key.clone(), config);
        self.rebuild_indexes();
    }

    /// Enabled agents, highest priority first; ties broken by ascending
    /// `AgentKey` for a deterministic order.
    #[must_use]
    pub fn get_enabled_agents(&self) -> Vec<&AgentConfig> {
        let mut enabled: Vec<&AgentConfig> = self.agents.values().filter(|agent| agent.enabled).collect();
        enabled.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.agent_key.cmp(&b.agent_key)));
        enabled
    }

    /// Looks up an agent's configuration regardless of enabled state.
    #[must_use]
    pub fn get_agent(&self, agent_key: &AgentKey) -> Option<&AgentConfig> {
        self.agents.get(agent_key)
    }

    /// Whether `agent_key` names a configured, enabled agent.
    #[must_use]
    pub fn is_agent_enabled(&self, agent_key: &AgentKey) -> bool {
        self.agents.get(agent_key).is_some_and(|agent| agent.enabled)
    }

    /// Enabled agents belonging to `domain_key`.
    #[must_use]
    pub fn get_agents_for_domain(&self, domain_key: &str) -> Vec<&AgentConfig> {
        self.agents
            .values()
            .filter(|agent| agent.enabled && agent.domain_key.as_deref() == Some(domain_key))
            .collect()
    }

    /// The agent assigned to `intent` in the derived index, if any.
    #[must_use]
    pub fn get_agent_for_intent(&self, intent: &str) -> Option<&AgentKey> {
        self.intent_to_agent.get(intent)
    }

    /// Every agent whose keyword list contains `keyword`, case-insensitive.
    #[must_use]
    pub fn get_agents_for_keyword(&self, keyword: &str) -> &[AgentKey] {
        self.keyword_index.get(&keyword.to_lowercase()).map_or(&[], Vec::as_slice)
    }

    /// Recomputes `intent_to_agent` and `keyword_index` from `agents`.
    /// Earlier (higher-priority) agents in `get_enabled_agents` order win
    /// ties on the intent index; the keyword index instead accumulates
    /// every matching agent, since more than one agent may legitimately
    /// claim the same keyword.
    pub fn rebuild_indexes(&mut self) {
        self.intent_to_agent.clear();
        self.keyword_index.clear();

        for agent in self.get_enabled_agents_owned() {
            for pattern in &agent.intent_patterns {
                self.intent_to_agent
                    .entry(pattern.pattern.clone())
                    .or_insert_with(|| agent.agent_key.clone());
            }
            for keyword in &agent.keywords {
                let keyword_lower = keyword.to_lowercase();
                let agents_for_keyword = self.keyword_index.entry(keyword_lower).or_default();
                if !agents_for_keyword.contains(&agent.agent_key) {
                    agents_for_keyword.push(agent.agent_key.clone());
                }
            }
        }
    }

    fn get_enabled_agents_owned(&self) -> Vec<AgentConfig> {
        self.get_enabled_agents().into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(key: &str, priority: u8, intents: &[&str], keywords: &[&str]) -> AgentConfig {
        let mut config = AgentConfig::builtin(AgentKey::try_new(key).unwrap(), key);
        config.priority = Priority::try_new(priority).unwrap();
        config.intent_patterns = intents.iter().map(|&i| IntentPattern::new(i)).collect();
        config.keywords = keywords.iter().map(ToString::to_string).collect();
        config
    }

    #[test]
    fn higher_priority_agent_wins_intent_tie() {
        let mut registry = TenantAgentRegistry::new(None);
        registry.set_agent(agent("low_agent", 10, &["producto"], &[]));
        registry.set_agent(agent("high_agent", 90, &["producto"], &[]));
        assert_eq!(
            registry.get_agent_for_intent("producto"),
            Some(&AgentKey::try_new("high_agent").unwrap())
        );
    }

    #[test]
    fn disabled_agent_is_excluded_from_indexes() {
        let mut registry = TenantAgentRegistry::new(None);
        let mut disabled = agent("quiet_agent", 90, &["producto"], &["hola"]);
        disabled.enabled = false;
        registry.set_agent(disabled);
        registry.set_agent(agent("fallback_agent", 10, &["producto"], &["hola"]));
        assert_eq!(
            registry.get_agent_for_intent("producto"),
            Some(&AgentKey::try_new("fallback_agent").unwrap())
        );
    }

    #[test]
    fn keyword_index_accumulates_every_matching_agent() {
        let mut registry = TenantAgentRegistry::new(None);
        registry.set_agent(agent("agent_a", 50, &[], &["hola"]));
        registry.set_agent(agent("agent_b", 50, &[], &["hola"]));
        assert_eq!(registry.get_agents_for_keyword("HOLA").len(), 2);
    }

    #[test]
    fn keyword_lookup_is_case_insensitive() {
        let mut registry = TenantAgentRegistry::new(None);
        registry.set_agent(agent("agent_a", 50, &[], &["Hola"]));
        assert_eq!(registry.get_agents_for_keyword("hola"), [AgentKey::try_new("agent_a").unwrap()]);
    }
}
