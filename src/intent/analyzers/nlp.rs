//! Local NLP intent analyzer (C4): weighted keyword/entity/similarity/
//! pattern scoring, combined the way the spaCy-backed fallback tier
//! combined them, but with entity extraction and vector similarity
//! delegated to an injected `NlpModel` so this crate carries no NLP model
//! dependency of its own.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::domain_types::{Intent, UnitScore};

use super::super::validator::default_agent_mapping;
use super::super::{AnalysisContext, AnalysisMethod, IntentResult, IntentValidator};
use super::IntentAnalyzer;

/// A named entity as extracted by whatever NLP backend implements
/// `NlpModel`; `label` follows the backend's own tagset (e.g. spaCy's
/// `ORG`, `MONEY`, `NUM`).
#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    /// The entity's surface text.
    pub text: String,
    /// The backend's label for this entity.
    pub label: String,
}

/// The NLP backend the analyzer defers to for anything beyond static
/// keyword/pattern matching: named-entity recognition and semantic
/// similarity against reference phrases. Kept as a trait so this crate
/// never has to pick (or vendor) a concrete NLP model.
pub trait NlpModel: Send + Sync {
    /// Extracts named entities from `text`.
    fn entities(&self, text: &str) -> Vec<ExtractedEntity>;

    /// Semantic similarity between `text` and `reference` in `[0.0, 1.0]`,
    /// or `0.0` if the backend has no vectors loaded for this text.
    fn similarity(&self, text: &str, reference: &str) -> f64;

    /// Whether this backend is available; an analyzer configured with a
    /// model that failed to load reports `false` here to avoid charging
    /// per-call similarity/entity scores that are meaningless.
    fn is_available(&self) -> bool;
}

/// An `NlpModel` with nothing loaded; keyword and pattern scoring still
/// work, entity and similarity scores are always zero.
pub struct NoopNlpModel;

impl NlpModel for NoopNlpModel {
    fn entities(&self, _text: &str) -> Vec<ExtractedEntity> {
        Vec::new()
    }

    fn similarity(&self, _text: &str, _reference: &str) -> f64 {
        0.0
    }

    fn is_available(&self) -> bool {
        true
    }
}

struct KeywordWeights {
    high: &'static [&'static str],
    medium: &'static [&'static str],
    low: &'static [&'static str],
}

static INTENT_KEYWORDS: Lazy<Vec<(&'static str, KeywordWeights)>> = Lazy::new(|| {
    vec![
        (
            "saludo",
            KeywordWeights {
                high: &["hola", "buenos días", "buenas tardes", "buenas noches", "saludos", "hey", "hi", "hello"],
                medium: &["buen día", "qué tal", "cómo estás", "cómo está", "qué onda"],
                low: &["buenas", "ey", "alo", "holi", "holaa"],
            },
        ),
        (
            "producto",
            KeywordWeights {
                high: &["producto", "productos", "catálogo", "stock", "disponible", "venden", "tienen"],
                medium: &["precio", "cuesta", "cuánto", "características", "especificaciones"],
                low: &["ver", "mostrar", "buscar"],
            },
        ),
        (
            "promociones",
            KeywordWeights {
                high: &["oferta", "ofertas", "descuento", "promoción", "cupón", "rebaja"],
                medium: &["barato", "económico", "sale", "liquidación"],
                low: &["precio", "costo"],
            },
        ),
        (
            "seguimiento",
            KeywordWeights {
                high: &["pedido", "orden", "envío", "tracking", "seguimiento", "entrega"],
                medium: &["dónde está", "cuándo llega", "rastrear"],
                low: &["estado", "ubicación"],
            },
        ),
        (
            "soporte",
            KeywordWeights {
                high: &["problema", "error", "ayuda", "soporte", "reclamo", "queja"],
                medium: &["no funciona", "defectuoso", "roto", "mal"],
                low: &["asistencia", "técnico"],
            },
        ),
        (
            "facturacion",
            KeywordWeights {
                high: &["factura", "recibo", "pago", "cobro", "reembolso"],
                medium: &["devolver", "cancelar", "tarjeta", "cuenta"],
                low: &["billing", "compra"],
            },
        ),
        (
            "categoria",
            KeywordWeights {
                high: &["categoría", "tipo", "clase"],
                medium: &["tecnología", "ropa", "zapatos", "televisores", "laptops"],
                low: &["accesorios", "celulares"],
            },
        ),
        (
            "despedida",
            KeywordWeights {
                high: &["adiós", "chau", "bye", "gracias", "eso es todo"],
                medium: &["hasta luego", "nada más", "terminar"],
                low: &["ok", "bien"],
            },
        ),
        (
            "excelencia",
            KeywordWeights {
                high: &["excelencia", "excelencia digital", "erp", "demo", "módulo", "módulos"],
                medium: &["software", "historia clínica", "turnos médicos", "healthcare", "hotel", "hoteles"],
                low: &["capacitación", "obras sociales", "gremio", "gremios"],
            },
        ),
        (
            "excelencia_soporte",
            KeywordWeights {
                high: &["incidencia", "ticket", "reportar", "bug", "falla"],
                medium: &["problema módulo", "error sistema", "levantar ticket"],
                low: &["soporte técnico", "ayuda software"],
            },
        ),
        (
            "excelencia_facturacion",
            KeywordWeights {
                high: &["factura cliente", "factura de cliente", "estado de cuenta", "cobranza"],
                medium: &["deuda cliente", "pago cliente", "cobrar cliente", "facturar cliente"],
                low: &["generar factura", "cuenta cliente"],
            },
        ),
        (
            "excelencia_promociones",
            KeywordWeights {
                high: &["promoción software", "descuento módulo", "oferta implementación", "promoción excelencia"],
                medium: &["descuento capacitación", "promo software", "oferta software"],
                low: &["descuento software", "precio especial software"],
            },
        ),
    ]
});

static ENTITY_RELEVANCE: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        ("producto", &["ORG", "MISC"] as &[&str]),
        ("seguimiento", &["NUM", "ID"] as &[&str]),
        ("facturacion", &["MONEY", "NUM"] as &[&str]),
        ("categoria", &["ORG", "MISC"] as &[&str]),
    ])
});

static REFERENCE_TEXTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("saludo", "hola buenos días buenas tardes saludos qué tal cómo estás"),
        ("producto", "ver productos disponibles precio stock catálogo"),
        ("promociones", "ofertas descuentos promociones cupones rebajas pedido compra"),
        ("seguimiento", "pedido envío tracking seguimiento entrega orden"),
        ("soporte", "problema ayuda error soporte técnico reclamo incidencia"),
        ("facturacion", "factura pago recibo cobro reembolso pedido orden"),
        ("categoria", "categoría tipo clase tecnología ropa"),
        ("despedida", "adiós gracias chau bye hasta luego"),
        (
            "excelencia",
            "excelencia digital erp demo módulos software historia clínica turnos médicos healthcare hotel",
        ),
        ("excelencia_facturacion", "factura cliente estado cuenta cobranza deuda pago cliente"),
        ("excelencia_promociones", "promoción software descuento módulo oferta implementación capacitación"),
    ])
});

const URGENCY_PATTERNS: &[&str] = &["urgente", "rápido", "ya", "inmediatamente", "ahora", "importante", "crítico", "grave"];

const COMBINE_WEIGHTS: [f64; 4] = [0.4, 0.2, 0.3, 0.1];

fn approx_token_count(text: &str) -> usize {
    text.split_whitespace().count().max(1)
}

fn keyword_scores(text_lower: &str) -> HashMap<&'static str, f64> {
    INTENT_KEYWORDS
        .iter()
        .map(|(intent, weights)| {
            let mut score = 0.0;
            score += weights.high.iter().filter(|kw| text_lower.contains(*kw)).count() as f64 * 1.0;
            score += weights.medium.iter().filter(|kw| text_lower.contains(*kw)).count() as f64 * 0.7;
            score += weights.low.iter().filter(|kw| text_lower.contains(*kw)).count() as f64 * 0.3;
            let normalized = (score / approx_token_count(text_lower) as f64 * 10.0).min(1.0);
            (*intent, normalized)
        })
        .collect()
}

fn entity_scores(entities: &[ExtractedEntity]) -> HashMap<&'static str, f64> {
    let mut scores: HashMap<&'static str, f64> = INTENT_KEYWORDS.iter().map(|(intent, _)| (*intent, 0.0)).collect();
    for entity in entities {
        for (&intent, labels) in ENTITY_RELEVANCE.iter() {
            if labels.contains(&entity.label.as_str()) {
                *scores.entry(intent).or_insert(0.0) += 0.5;
            }
        }
    }
    scores
}

fn similarity_scores(model: &dyn NlpModel, text: &str) -> HashMap<&'static str, f64> {
    REFERENCE_TEXTS
        .iter()
        .map(|(&intent, reference)| (intent, model.similarity(text, reference).max(0.0)))
        .collect()
}

fn pattern_scores(text_lower: &str) -> HashMap<&'static str, f64> {
    let mut scores: HashMap<&'static str, f64> = INTENT_KEYWORDS.iter().map(|(intent, _)| (*intent, 0.0)).collect();

    if text_lower.chars().any(|c| c.is_ascii_digit()) {
        *scores.entry("seguimiento").or_insert(0.0) += 0.3;
        *scores.entry("facturacion").or_insert(0.0) += 0.2;
    }
    if ["$", "€", "usd", "pesos"].iter().any(|token| text_lower.contains(token)) {
        *scores.entry("producto").or_insert(0.0) += 0.3;
        *scores.entry("facturacion").or_insert(0.0) += 0.4;
    }
    if URGENCY_PATTERNS.iter().any(|pattern| text_lower.contains(pattern)) {
        *scores.entry("soporte").or_insert(0.0) += 0.4;
    }
    if ["qué", "que", "dónde", "donde", "cuándo", "cuando", "cómo", "como"]
        .iter()
        .any(|word| text_lower.split_whitespace().any(|token| token == *word))
    {
        *scores.entry("producto").or_insert(0.0) += 0.2;
        *scores.entry("seguimiento").or_insert(0.0) += 0.2;
    }

    scores
}

fn combine(score_sets: [&HashMap<&'static str, f64>; 4]) -> HashMap<&'static str, f64> {
    let mut combined: HashMap<&'static str, f64> = INTENT_KEYWORDS.iter().map(|(intent, _)| (*intent, 0.0)).collect();
    for (weight, scores) in COMBINE_WEIGHTS.iter().zip(score_sets) {
        for (&intent, &score) in scores {
            *combined.entry(intent).or_insert(0.0) += score * weight;
        }
    }
    combined
}

/// Picks the highest-scoring intent and converts its raw score into a
/// capped confidence: `min(raw * 0.9, 0.9)`, falling back if that is still
/// under `0.3`.
fn best_intent(scores: &HashMap<&'static str, f64>) -> (&'static str, f64) {
    let best = scores
        .iter()
        .fold(None, |best: Option<(&'static str, f64)>, (&intent, &score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((intent, score)),
        });

    let Some((intent, raw_score)) = best else {
        return ("fallback", 0.4);
    };
    if raw_score <= 0.0 {
        return ("fallback", 0.4);
    }

    let confidence = (raw_score * 0.9).min(0.9);
    if confidence < 0.3 {
        ("fallback", 0.4)
    } else {
        (intent, confidence)
    }
}

/// Local, dependency-light stand-in for the spaCy-backed fallback tier:
/// weighted keyword/entity/similarity/pattern scoring, with NER and vector
/// similarity delegated to an injected `NlpModel`.
pub struct NlpIntentAnalyzer {
    model: Arc<dyn NlpModel>,
    validator: Arc<IntentValidator>,
    intent_to_agent: HashMap<String, crate::domain_types::AgentKey>,
}

impl NlpIntentAnalyzer {
    /// Builds an analyzer backed by `model` for entity/similarity scoring.
    #[must_use]
    pub fn new(model: Arc<dyn NlpModel>, validator: Arc<IntentValidator>) -> Self {
        Self {
            model,
            validator,
            intent_to_agent: default_agent_mapping(),
        }
    }

    /// Whether the underlying backend is usable; the router should skip
    /// straight to the keyword tier when this is `false`.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.model.is_available()
    }
}

#[async_trait]
impl IntentAnalyzer for NlpIntentAnalyzer {
    async fn analyze(&self, message: &str, _context: AnalysisContext<'_>) -> IntentResult {
        let text_lower = message.to_lowercase();
        let entities = self.model.entities(&text_lower);

        let keywords = keyword_scores(&text_lower);
        let entity = entity_scores(&entities);
        let similarity = similarity_scores(self.model.as_ref(), &text_lower);
        let pattern = pattern_scores(&text_lower);
        let combined = combine([&keywords, &entity, &similarity, &pattern]);

        let (intent_name, confidence) = best_intent(&combined);
        let intent = Intent::try_new(intent_name).unwrap_or_else(|_| Intent::fallback());
        let target_agent = self.validator.map_intent_to_agent(&intent, &self.intent_to_agent);

        IntentResult {
            primary_intent: intent,
            confidence: UnitScore::clamped(confidence),
            target_agent,
            method: AnalysisMethod::Nlp,
            reasoning: format!("Local NLP analysis scored '{intent_name}' at {confidence:.2}"),
            entities: entities
                .into_iter()
                .enumerate()
                .map(|(i, entity)| (format!("entity_{i}"), serde_json::json!({"text": entity.text, "label": entity.label})))
                .collect(),
        }
    }

    fn method_name(&self) -> &'static str {
        "local_nlp"
    }
}
