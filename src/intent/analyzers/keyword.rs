//! Keyword-pattern intent analyzer: the always-available last resort when
//! the LLM and NLP tiers are unavailable or unconvincing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::domain_types::{Intent, UnitScore};

use super::super::validator::default_agent_mapping;
use super::super::{AnalysisContext, AnalysisMethod, IntentResult, IntentValidator};
use super::IntentAnalyzer;

/// Keyword lists per intent, ported from the keyword-pattern table; order
/// does not matter here since every intent's full list is scored.
static KEYWORD_PATTERNS: Lazy<Vec<(&'static str, &'static [&'static str])>> = Lazy::new(|| {
    vec![
        (
            "saludo",
            &[
                "hola",
                "buenos días",
                "buenas tardes",
                "buenas noches",
                "saludos",
                "hey",
                "hi",
                "hello",
                "qué tal",
                "cómo estás",
            ],
        ),
        (
            "producto",
            &[
                "producto",
                "productos",
                "stock",
                "precio",
                "cuesta",
                "venden",
                "tienen",
                "catálogo",
                "disponible",
            ],
        ),
        (
            "promociones",
            &["oferta", "ofertas", "descuento", "promoción", "cupón", "rebaja", "barato"],
        ),
        (
            "seguimiento",
            &["pedido", "orden", "envío", "tracking", "seguimiento", "dónde está", "cuando llega"],
        ),
        (
            "facturacion",
            &["factura pedido", "recibo", "pago", "cobro", "reembolso", "devolver", "cancelar"],
        ),
        (
            "categoria",
            &["categoría", "tipo", "tecnología", "ropa", "zapatos", "televisores", "laptops"],
        ),
        (
            "excelencia_facturacion",
            &[
                "factura cliente",
                "factura de cliente",
                "estado de cuenta",
                "cobranza",
                "cobrar cliente",
                "deuda cliente",
                "pago cliente",
                "facturar cliente",
                "generar factura cliente",
            ],
        ),
        (
            "excelencia_promociones",
            &[
                "promoción software",
                "descuento módulo",
                "oferta implementación",
                "promoción excelencia",
                "descuento capacitación",
                "promo software",
                "oferta software",
                "descuento software",
            ],
        ),
        (
            "excelencia",
            &[
                "excelencia",
                "excelencia digital",
                "misión",
                "visión",
                "erp",
                "demo",
                "módulo",
                "módulos",
                "software",
                "turnos médicos",
                "historia clínica",
                "healthcare",
                "hotel",
                "hoteles",
                "obras sociales",
                "gremio",
                "gremios",
                "capacitación",
            ],
        ),
        (
            "excelencia_soporte",
            &[
                "incidencia",
                "reportar",
                "ticket",
                "falla",
                "bug",
                "levantar ticket",
                "problema módulo",
                "error sistema",
                "error interno",
            ],
        ),
        (
            "soporte",
            &["problema producto", "error envío", "ayuda pedido", "reclamo compra", "defectuoso"],
        ),
        (
            "despedida",
            &["adiós", "chau", "bye", "gracias", "eso es todo", "hasta luego", "nada más"],
        ),
    ]
});

/// Confidence awarded for a given number of matched keywords:
/// `min(0.5 + matches * 0.15, 0.8)`.
fn confidence_for_matches(matches: u32) -> f64 {
    (0.5 + f64::from(matches) * 0.15).min(0.8)
}

/// Scores every intent's keyword list against `message`, always available
/// since it needs nothing but its own static tables.
pub struct KeywordIntentAnalyzer {
    validator: Arc<IntentValidator>,
    intent_to_agent: HashMap<String, crate::domain_types::AgentKey>,
}

impl KeywordIntentAnalyzer {
    /// Builds an analyzer that maps matched intents to agents via
    /// `validator`, previewing routes against the default (non-tenant)
    /// agent mapping.
    #[must_use]
    pub fn new(validator: Arc<IntentValidator>) -> Self {
        Self {
            validator,
            intent_to_agent: default_agent_mapping(),
        }
    }

    /// Scores every intent's keyword list, in table order, so ties between
    /// equally-matched intents resolve deterministically to the first one
    /// listed rather than to whatever order a hash map happens to iterate.
    fn score(message_lower: &str) -> Vec<(&'static str, u32)> {
        KEYWORD_PATTERNS
            .iter()
            .map(|(intent, keywords)| {
                let matches = keywords.iter().filter(|kw| message_lower.contains(*kw)).count() as u32;
                (*intent, matches)
            })
            .collect()
    }
}

#[async_trait]
impl IntentAnalyzer for KeywordIntentAnalyzer {
    async fn analyze(&self, message: &str, _context: AnalysisContext<'_>) -> IntentResult {
        let message_lower = message.to_lowercase();
        let scores = Self::score(&message_lower);

        let best = scores
            .into_iter()
            .filter(|&(_, count)| count > 0)
            .fold(None, |best: Option<(&str, u32)>, (intent, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((intent, count)),
            });

        let Some((intent_name, matches)) = best else {
            return IntentResult {
                primary_intent: Intent::fallback(),
                confidence: UnitScore::clamped(0.4),
                target_agent: crate::domain_types::AgentKey::fallback(),
                method: AnalysisMethod::Keyword,
                reasoning: "No keyword patterns matched".to_string(),
                entities: Default::default(),
            };
        };

        let intent = Intent::try_new(intent_name).unwrap_or_else(|_| Intent::fallback());
        let target_agent = self.validator.map_intent_to_agent(&intent, &self.intent_to_agent);

        IntentResult {
            primary_intent: intent,
            confidence: UnitScore::clamped(confidence_for_matches(matches)),
            target_agent,
            method: AnalysisMethod::Keyword,
            reasoning: format!("Keyword match: {matches} keywords found for '{intent_name}'"),
            entities: Default::default(),
        }
    }

    fn method_name(&self) -> &'static str {
        "keyword_fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::AgentKey;

    fn analyzer() -> KeywordIntentAnalyzer {
        KeywordIntentAnalyzer::new(Arc::new(IntentValidator::new(AgentKey::fallback())))
    }

    #[tokio::test]
    async fn matches_best_scoring_intent() {
        let result = analyzer().analyze("hola, buenos días!", AnalysisContext::default()).await;
        assert_eq!(result.primary_intent.as_ref(), "saludo");
        assert_eq!(result.method, AnalysisMethod::Keyword);
    }

    #[tokio::test]
    async fn more_matches_yield_higher_confidence() {
        let one = analyzer().analyze("hola", AnalysisContext::default()).await;
        let two = analyzer().analyze("hola buenos días", AnalysisContext::default()).await;
        assert!(f64::from(two.confidence) > f64::from(one.confidence));
    }

    #[tokio::test]
    async fn no_match_falls_back() {
        let result = analyzer().analyze("xyzxyzxyz", AnalysisContext::default()).await;
        assert_eq!(result.primary_intent, Intent::fallback());
        assert_eq!(f64::from(result.confidence), 0.4);
    }
}
