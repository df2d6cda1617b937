//! Bypass routing rules (C6): tenant-configured overrides evaluated
//! before the intent cascade, letting a specific phone number or
//! WhatsApp line route straight to an agent regardless of message
//! content.

use serde::{Deserialize, Serialize};

use crate::domain_types::{AgentKey, Priority};

/// Which field a bypass rule matches against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum BypassRuleType {
    /// Matches the user's phone number against `pattern`, where a
    /// trailing `*` matches any suffix (e.g. `"549264*"`).
    PhoneNumber {
        /// The pattern to match, optionally ending in `*`.
        pattern: String,
    },
    /// Matches the user's phone number against an explicit allow-list.
    PhoneNumberList {
        /// The phone numbers this rule matches.
        phone_numbers: Vec<String>,
    },
    /// Matches the inbound WhatsApp Business phone number id exactly.
    WhatsappPhoneNumberId {
        /// The configured phone number id.
        phone_number_id: String,
    },
}

/// A single bypass rule: a match condition plus the agent to route to
/// when it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BypassRule {
    /// Human-readable name, surfaced in logs and admin tooling.
    pub rule_name: String,
    /// Longer free-text note on why the rule exists, for admin tooling only.
    pub description: Option<String>,
    /// The match condition.
    pub rule_type: BypassRuleType,
    /// The agent to route to when this rule matches.
    pub target_agent: AgentKey,
    /// Evaluation order among a tenant's rules; higher runs first.
    pub priority: Priority,
    /// Whether this rule is currently active.
    pub enabled: bool,
    /// Whether a conversation routed by this rule keeps context isolated
    /// from the tenant's normal conversation history (e.g. a dedicated
    /// support line that should not see prior unrelated turns).
    pub isolated_history: bool,
}

impl BypassRule {
    /// Builds a rule with `isolated_history` off and no description, the
    /// common case for a plain routing override.
    #[must_use]
    pub fn new(rule_name: impl Into<String>, rule_type: BypassRuleType, target_agent: AgentKey, priority: Priority) -> Self {
        Self {
            rule_name: rule_name.into(),
            description: None,
            rule_type,
            target_agent,
            priority,
            enabled: true,
            isolated_history: false,
        }
    }

    /// Whether `phone` (if any) or `whatsapp_phone_number_id` (if any)
    /// satisfies this rule's condition.
    #[must_use]
    pub fn matches(&self, phone: Option<&str>, whatsapp_phone_number_id: Option<&str>) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.rule_type {
            BypassRuleType::PhoneNumber { pattern } => phone.is_some_and(|phone| match_phone_pattern(phone, pattern)),
            BypassRuleType::PhoneNumberList { phone_numbers } => {
                phone.is_some_and(|phone| phone_numbers.iter().any(|candidate| candidate == phone))
            }
            BypassRuleType::WhatsappPhoneNumberId { phone_number_id } => {
                whatsapp_phone_number_id.is_some_and(|id| id == phone_number_id)
            }
        }
    }
}

/// Matches `phone` against `pattern`, treating a trailing `*` as a
/// wildcard over any suffix; otherwise requires an exact match.
#[must_use]
pub fn match_phone_pattern(phone: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => phone.starts_with(prefix),
        None => phone == pattern,
    }
}

/// A tenant's bypass rules, evaluated in priority order (highest first),
/// first match wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BypassRules {
    rules: Vec<BypassRule>,
}

impl BypassRules {
    /// Builds a rule set from `rules`, sorted into evaluation order.
    #[must_use]
    pub fn new(mut rules: Vec<BypassRule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }

    /// Evaluates every enabled rule in priority order against the given
    /// identifiers, returning the first match's target agent.
    #[must_use]
    pub fn evaluate(&self, phone: Option<&str>, whatsapp_phone_number_id: Option<&str>) -> Option<&AgentKey> {
        self.rules
            .iter()
            .find(|rule| rule.matches(phone, whatsapp_phone_number_id))
            .map(|rule| &rule.target_agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, rule_type: BypassRuleType, target: &str, priority: u8) -> BypassRule {
        BypassRule::new(
            name,
            rule_type,
            AgentKey::try_new(target).unwrap(),
            Priority::try_new(priority).unwrap(),
        )
    }

    #[test]
    fn wildcard_pattern_matches_prefix() {
        assert!(match_phone_pattern("5492641234567", "549264*"));
        assert!(!match_phone_pattern("5491112345678", "549264*"));
    }

    #[test]
    fn exact_pattern_requires_full_match() {
        assert!(match_phone_pattern("5492641234567", "5492641234567"));
        assert!(!match_phone_pattern("5492641234567", "549264"));
    }

    #[test]
    fn phone_number_list_matches_member() {
        let rules = BypassRules::new(vec![rule(
            "vip list",
            BypassRuleType::PhoneNumberList {
                phone_numbers: vec!["111".to_string(), "222".to_string()],
            },
            "pharmacy_operations_agent",
            50,
        )]);
        assert_eq!(
            rules.evaluate(Some("222"), None),
            Some(&AgentKey::try_new("pharmacy_operations_agent").unwrap())
        );
        assert_eq!(rules.evaluate(Some("333"), None), None);
    }

    #[test]
    fn whatsapp_phone_number_id_matches_exactly() {
        let rules = BypassRules::new(vec![rule(
            "wa line",
            BypassRuleType::WhatsappPhoneNumberId {
                phone_number_id: "100200300".to_string(),
            },
            "excelencia_support_agent",
            50,
        )]);
        assert_eq!(
            rules.evaluate(None, Some("100200300")),
            Some(&AgentKey::try_new("excelencia_support_agent").unwrap())
        );
    }

    #[test]
    fn higher_priority_rule_wins_when_both_match() {
        let rules = BypassRules::new(vec![
            rule("low", BypassRuleType::PhoneNumber { pattern: "*".to_string() }, "low_agent", 10),
            rule("high", BypassRuleType::PhoneNumber { pattern: "*".to_string() }, "high_agent", 90),
        ]);
        assert_eq!(
            rules.evaluate(Some("anything"), None),
            Some(&AgentKey::try_new("high_agent").unwrap())
        );
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let mut disabled = rule("off", BypassRuleType::PhoneNumber { pattern: "123*".to_string() }, "a", 90);
        disabled.enabled = false;
        let rules = BypassRules::new(vec![
            disabled,
            rule("on", BypassRuleType::PhoneNumber { pattern: "123*".to_string() }, "b", 10),
        ]);
        assert_eq!(rules.evaluate(Some("123456"), None), Some(&AgentKey::try_new("b").unwrap()));
    }
}
