//! Intent validation, agent mapping, and multi-turn flow detection (C3).
//!
//! Two fixed tables drive this module: `AGENT_TO_INTENT` corrects the
//! common LLM error of returning an agent key where an intent name was
//! expected, and `FLOW_AGENTS` marks agents that own a multi-turn dialogue
//! and must keep routing pinned to them.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

use crate::domain_types::{AgentKey, Intent, UnitScore};

use super::{AnalysisMethod, IntentResult};

/// Maps an agent key back to the intent name it corresponds to, for
/// correcting an LLM that returned `"greeting_agent"` where `"saludo"` was
/// expected.
static AGENT_TO_INTENT: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("excelencia_agent", "excelencia"),
        ("excelencia_support_agent", "excelencia_soporte"),
        ("excelencia_invoice_agent", "excelencia_facturacion"),
        ("excelencia_promotions_agent", "excelencia_promociones"),
        ("support_agent", "soporte"),
        ("greeting_agent", "saludo"),
        ("fallback_agent", "fallback"),
        ("farewell_agent", "despedida"),
        ("product_agent", "producto"),
        ("ecommerce_agent", "ecommerce"),
        ("data_insights_agent", "datos"),
        ("pharmacy_operations_agent", "pharmacy"),
    ])
});

/// Agents known to own a multi-turn conversational flow; while one of these
/// owns the previous turn, routing is pinned to it rather than
/// re-evaluated.
static FLOW_AGENTS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "excelencia_support_agent",
        "excelencia_invoice_agent",
        "pharmacy_operations_agent",
    ])
});

/// Keyword routing used only when `follow_up`/`flow_continuation` handling
/// has no previous agent to pin to; a last attempt at a sensible target
/// before giving up to the fallback agent.
static KEYWORD_TO_AGENT: Lazy<Vec<(&'static str, &'static [&'static str])>> = Lazy::new(|| {
    vec![
        (
            "pharmacy_operations_agent",
            &[
                "receta",
                "medicamento",
                "farmacia",
                "medicamentos",
                "pedido farmacia",
                "deuda farmacia",
                "urgente receta",
                "envié receta",
                "mandé receta",
            ],
        ),
        (
            "excelencia_support_agent",
            &[
                "problema",
                "error",
                "falla",
                "no funciona",
                "ayuda",
                "soporte",
                "incidente",
                "bug",
                "ticket",
            ],
        ),
        (
            "excelencia_invoice_agent",
            &["factura", "facturación", "cobro", "pago", "cuenta", "deuda"],
        ),
        (
            "greeting_agent",
            &["hola", "buenos días", "buenas tardes", "buenas noches", "hi", "hello"],
        ),
        (
            "farewell_agent",
            &["adiós", "chao", "bye", "hasta luego", "gracias", "nos vemos"],
        ),
    ]
});

/// Builds the default intent-to-agent mapping by reversing
/// `AGENT_TO_INTENT`, for callers with no tenant-specific registry to
/// consult (the keyword analyzer's preview routing, tests, and the
/// system-agent bootstrap).
#[must_use]
pub fn default_agent_mapping() -> HashMap<String, AgentKey> {
    AGENT_TO_INTENT
        .iter()
        .filter_map(|(&agent, &intent)| AgentKey::try_new(agent).ok().map(|agent| (intent.to_string(), agent)))
        .collect()
}

/// The default valid-intent set (every intent `AGENT_TO_INTENT` maps to,
/// plus `follow_up`), for callers with no tenant-specific schema to
/// consult.
#[must_use]
pub fn default_valid_intents() -> HashSet<String> {
    AGENT_TO_INTENT
        .values()
        .map(|&intent| intent.to_string())
        .chain(std::iter::once("follow_up".to_string()))
        .collect()
}

/// Conversation-side inputs `IntentValidator` needs: the previous turn's
/// agent and, for keyword-based follow-up recovery, the raw message.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversationSnapshot<'a> {
    /// The agent that produced the previous turn's response, if any.
    pub previous_agent: Option<&'a str>,
}

/// Validates intents against a tenant's valid set, maps intents to agents,
/// and detects when a previous turn's agent owns an active flow.
pub struct IntentValidator {
    fallback_agent: AgentKey,
}

impl IntentValidator {
    /// Builds a validator that falls back to `fallback_agent` whenever no
    /// better target can be determined.
    #[must_use]
    pub fn new(fallback_agent: AgentKey) -> Self {
        Self { fallback_agent }
    }

    /// Validates `intent` against `valid_intents`, correcting the common
    /// agent-key-for-intent-name LLM mistake before giving up to
    /// `"fallback"`.
    ///
    /// Returns `(validated_intent, confidence, reason)`.
    #[must_use]
    pub fn validate(&self, intent: &str, valid_intents: &HashSet<String>) -> (Intent, UnitScore, String) {
        if valid_intents.contains(intent) {
            if let Ok(validated) = Intent::try_new(intent) {
                return (validated, UnitScore::clamped(1.0), "valid intent".to_string());
            }
        }

        if let Some(&mapped) = AGENT_TO_INTENT.get(intent) {
            if valid_intents.contains(mapped) {
                if let Ok(validated) = Intent::try_new(mapped) {
                    return (
                        validated,
                        UnitScore::clamped(0.9),
                        format!("mapped from agent name '{intent}'"),
                    );
                }
            }
        }

        (
            Intent::fallback(),
            UnitScore::clamped(0.4),
            "LLM returned an invalid intent".to_string(),
        )
    }

    /// Checks whether the previous turn's agent owns an active multi-turn
    /// flow; if so, routing must stay pinned to it without consulting any
    /// analyzer.
    #[must_use]
    pub fn check_active_flow(&self, conversation: ConversationSnapshot<'_>) -> Option<IntentResult> {
        let previous_agent = conversation.previous_agent?;
        if previous_agent == "orchestrator" || previous_agent == "supervisor" {
            return None;
        }
        if !FLOW_AGENTS.contains(previous_agent) {
            return None;
        }
        let target_agent = AgentKey::try_new(previous_agent).ok()?;
        Some(IntentResult {
            primary_intent: Intent::try_new("follow_up").ok()?,
            confidence: UnitScore::clamped(0.95),
            target_agent: target_agent.clone(),
            method: AnalysisMethod::FlowContinuation,
            reasoning: format!("continuing active flow with {previous_agent}"),
            entities: Default::default(),
        })
    }

    /// Looks up the agent assigned to `intent` in `intent_to_agent`,
    /// falling back to `fallback_agent` when there is no mapping.
    #[must_use]
    pub fn map_intent_to_agent(&self, intent: &Intent, intent_to_agent: &HashMap<String, AgentKey>) -> AgentKey {
        intent_to_agent
            .get(intent.as_ref())
            .cloned()
            .unwrap_or_else(|| self.fallback_agent.clone())
    }

    /// Resolves the target agent for a `follow_up` intent: the previous
    /// agent if known, else a keyword match against the user's message,
    /// else the fallback agent.
    #[must_use]
    pub fn handle_follow_up(&self, conversation: ConversationSnapshot<'_>, message: &str) -> AgentKey {
        if let Some(previous_agent) = conversation.previous_agent {
            if previous_agent != "orchestrator" {
                if let Ok(agent) = AgentKey::try_new(previous_agent) {
                    return agent;
                }
            }
        }

        if let Some(agent) = Self::keyword_route(message) {
            return agent;
        }

        self.fallback_agent.clone()
    }

    fn keyword_route(message: &str) -> Option<AgentKey> {
        let lower = message.to_lowercase();
        for (agent, keywords) in KEYWORD_TO_AGENT.iter() {
            if keywords.iter().any(|keyword| lower.contains(keyword)) {
                return AgentKey::try_new(*agent).ok();
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> IntentValidator {
        IntentValidator::new(AgentKey::fallback())
    }

    #[test]
    fn valid_intent_passes_through() {
        let valid = HashSet::from(["saludo".to_string()]);
        let (intent, confidence, _) = validator().validate("saludo", &valid);
        assert_eq!(intent.as_ref(), "saludo");
        assert_eq!(f64::from(confidence), 1.0);
    }

    #[test]
    fn agent_name_is_mapped_to_intent() {
        let valid = HashSet::from(["saludo".to_string()]);
        let (intent, confidence, reason) = validator().validate("greeting_agent", &valid);
        assert_eq!(intent.as_ref(), "saludo");
        assert_eq!(f64::from(confidence), 0.9);
        assert!(reason.contains("mapped"));
    }

    #[test]
    fn unmappable_intent_falls_back() {
        let valid = HashSet::from(["saludo".to_string()]);
        let (intent, confidence, _) = validator().validate("nonsense", &valid);
        assert_eq!(intent.as_ref(), "fallback");
        assert_eq!(f64::from(confidence), 0.4);
    }

    #[test]
    fn active_flow_pins_to_previous_agent() {
        let result = validator()
            .check_active_flow(ConversationSnapshot {
                previous_agent: Some("excelencia_support_agent"),
            })
            .expect("flow agent should be detected");
        assert_eq!(result.target_agent.as_ref(), "excelencia_support_agent");
        assert_eq!(result.method, AnalysisMethod::FlowContinuation);
        assert_eq!(f64::from(result.confidence), 0.95);
    }

    #[test]
    fn orchestrator_as_previous_agent_is_not_a_flow() {
        assert!(
            validator()
                .check_active_flow(ConversationSnapshot {
                    previous_agent: Some("orchestrator"),
                })
                .is_none()
        );
    }

    #[test]
    fn non_flow_agent_is_not_pinned() {
        assert!(
            validator()
                .check_active_flow(ConversationSnapshot {
                    previous_agent: Some("product_agent"),
                })
                .is_none()
        );
    }

    #[test]
    fn follow_up_without_previous_agent_uses_keywords() {
        let agent = validator().handle_follow_up(ConversationSnapshot { previous_agent: None }, "necesito mi receta");
        assert_eq!(agent.as_ref(), "pharmacy_operations_agent");
    }

    #[test]
    fn follow_up_with_no_match_falls_back() {
        let agent = validator().handle_follow_up(ConversationSnapshot { previous_agent: None }, "xyz");
        assert_eq!(agent, AgentKey::fallback());
    }

    #[test]
    fn follow_up_prefers_previous_agent() {
        let agent = validator().handle_follow_up(
            ConversationSnapshot {
                previous_agent: Some("excelencia_invoice_agent"),
            },
            "hola",
        );
        assert_eq!(agent.as_ref(), "excelencia_invoice_agent");
    }
}
