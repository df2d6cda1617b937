//! Response quality evaluation (C10a).
//!
//! Scores a worker's response along several heuristic dimensions, detects
//! generic "fallback" phrasing, and decides whether re-routing could plausibly
//! help. None of the thresholds here are tunable at runtime in the source
//! system beyond the three constructor thresholds; the rest are fixed
//! constants, carried over exactly.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain_types::{AgentKey, UnitScore};

/// Coarse bucket a response falls into once scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCategory {
    /// Contains specific information (names, numbers, or a bulleted list).
    CompleteWithData,
    /// Some information provided, but not the specific data a query type needs.
    PartialInfo,
    /// Generic, no real data — a canned redirect or "no info" phrase.
    FallbackResponse,
    /// An error occurred while producing the response.
    ErrorResponse,
    /// Points the user elsewhere without answering.
    RedirectResponse,
}

/// What the supervisor suggests happen next, before the flow controller's
/// own human-handoff and re-route-usefulness checks are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// The response is good enough to return to the user.
    Accept,
    /// Try a different agent.
    ReRoute,
    /// Don't retry — re-routing would not help.
    StopRetry,
}

/// Coarse intent of the user's question, used to decide which kind of
/// specific data a "complete" answer needs to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Questions about the company, its leadership, or its mission.
    Corporate,
    /// Questions about products, prices, or features.
    Products,
    /// Requests for a demo.
    Demo,
    /// Support/incident questions.
    Support,
    /// Anything else.
    General,
}

/// The full structured result of evaluating one worker response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityEvaluation {
    /// The weighted, category-adjusted overall score.
    pub overall_score: UnitScore,
    /// Length + question-word heuristic.
    pub completeness_score: UnitScore,
    /// Word-overlap + agent-relevance heuristic.
    pub relevance_score: UnitScore,
    /// Sentence-length and structural-connective heuristic.
    pub clarity_score: UnitScore,
    /// Actionable-verb + specificity + tone heuristic.
    pub helpfulness_score: UnitScore,
    /// The agent that produced the evaluated response.
    pub agent_name: AgentKey,
    /// Character length of the evaluated response.
    pub response_length: usize,
    /// The category the response was placed in.
    pub category: ResponseCategory,
    /// What the evaluator suggests doing next.
    pub suggested_action: SuggestedAction,
    /// How fallback-like the response is, `[0, 1]`.
    pub fallback_score: UnitScore,
    /// Whether the worker's own retrieval step reported results.
    pub rag_had_results: bool,
    /// The detected query type, used for category adjustment.
    pub query_type: QueryType,
}

struct FallbackPhrases {
    redirect: &'static [&'static str],
    no_info: &'static [&'static str],
    generic_offer: &'static [&'static str],
}

static FALLBACK_PHRASES: FallbackPhrases = FallbackPhrases {
    redirect: &[
        "te recomiendo visitar",
        "visita la pagina",
        "visita el portal",
        "visitar nuestra",
        "contacta a",
        "contactar a",
        "comunicate con",
        "comunicarte con",
    ],
    no_info: &[
        "no encontre informacion",
        "no tengo informacion",
        "no dispongo de",
        "no cuento con",
        "no pude encontrar",
        "no tengo datos",
    ],
    generic_offer: &[
        "puedo ayudarte con",
        "estoy aqui para ayudarte",
        "en que mas puedo ayudarte",
    ],
};

/// Calculates how generic/fallback-like a response reads, `[0, 1]`.
///
/// Redirect phrases contribute +0.4 (if any match), "no info" phrases
/// contribute +0.5, generic offers +0.2; the sum is capped at 1.0.
#[must_use]
pub fn calculate_fallback_score(response: &str) -> UnitScore {
    let lower = response.to_lowercase();
    let mut score = 0.0;
    if FALLBACK_PHRASES.redirect.iter().any(|p| lower.contains(p)) {
        score += 0.4;
    }
    if FALLBACK_PHRASES.no_info.iter().any(|p| lower.contains(p)) {
        score += 0.5;
    }
    if FALLBACK_PHRASES.generic_offer.iter().any(|p| lower.contains(p)) {
        score += 0.2;
    }
    UnitScore::clamped(score)
}

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+").expect("valid regex"));
static NUMBER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$?\d+(?:[.,]\d+)?").expect("valid regex"));
static FEATURE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-•]\s*[^\n]+").expect("valid regex"));

/// Specific data elements detected in a response.
#[derive(Debug, Clone, Default)]
pub struct FoundData {
    /// Proper names (consecutive capitalized words).
    pub names: Vec<String>,
    /// Numbers and prices.
    pub numbers: Vec<String>,
    /// Bullet-point-like lines.
    pub features: Vec<String>,
}

/// Scans `response` for proper names, numbers, and bullet-like lines.
#[must_use]
pub fn detect_specific_data(response: &str) -> FoundData {
    FoundData {
        names: NAME_PATTERN
            .find_iter(response)
            .map(|m| m.as_str().to_string())
            .collect(),
        numbers: NUMBER_PATTERN
            .find_iter(response)
            .map(|m| m.as_str().to_string())
            .collect(),
        features: FEATURE_PATTERN
            .find_iter(response)
            .map(|m| m.as_str().to_string())
            .collect(),
    }
}

/// Whether `found` satisfies the kind of specific data `query_type` expects:
/// corporate queries need names, product queries need numbers, everything
/// else has no requirement.
#[must_use]
pub fn has_specific_data(found: &FoundData, query_type: QueryType) -> bool {
    match query_type {
        QueryType::Corporate => !found.names.is_empty(),
        QueryType::Products => !found.numbers.is_empty(),
        QueryType::Demo | QueryType::Support | QueryType::General => true,
    }
}

/// Detects the coarse query type from keyword membership, checked in a
/// fixed priority order (corporate, then products, then demo, then support).
#[must_use]
pub fn detect_query_type(user_message: &str) -> QueryType {
    let lower = user_message.to_lowercase();
    const CORPORATE: &[&str] = &[
        "ceo", "director", "fundador", "dueño", "propietario", "quien es", "quién es", "empresa",
        "quienes somos", "mision", "vision",
    ];
    const PRODUCTS: &[&str] = &["precio", "costo", "cuanto", "cuánto", "producto", "modulo", "módulo"];
    const DEMO: &[&str] = &["demo", "demostracion", "demostración", "prueba"];
    const SUPPORT: &[&str] = &["problema", "error", "falla", "soporte", "ayuda"];

    if CORPORATE.iter().any(|kw| lower.contains(kw)) {
        QueryType::Corporate
    } else if PRODUCTS.iter().any(|kw| lower.contains(kw)) {
        QueryType::Products
    } else if DEMO.iter().any(|kw| lower.contains(kw)) {
        QueryType::Demo
    } else if SUPPORT.iter().any(|kw| lower.contains(kw)) {
        QueryType::Support
    } else {
        QueryType::General
    }
}

fn categorize_response(fallback_score: UnitScore, has_specific: bool, query_type: QueryType) -> ResponseCategory {
    let fallback: f64 = fallback_score.into_inner();
    if fallback >= 0.6 {
        return ResponseCategory::FallbackResponse;
    }
    if fallback >= 0.3 && !has_specific {
        return ResponseCategory::RedirectResponse;
    }
    if matches!(query_type, QueryType::Corporate | QueryType::Products) && !has_specific {
        return ResponseCategory::PartialInfo;
    }
    if has_specific {
        return ResponseCategory::CompleteWithData;
    }
    ResponseCategory::PartialInfo
}

fn adjust_by_category(base_score: f64, category: ResponseCategory, _fallback_score: UnitScore) -> UnitScore {
    let adjustment = match category {
        ResponseCategory::CompleteWithData => 0.1,
        ResponseCategory::PartialInfo => 0.0,
        ResponseCategory::FallbackResponse => -0.3,
        ResponseCategory::RedirectResponse => -0.2,
        ResponseCategory::ErrorResponse => -0.4,
    };
    UnitScore::clamped(base_score + adjustment)
}

fn determine_action(
    category: ResponseCategory,
    rag_had_results: bool,
    retry_count: u32,
    agent_history: &[AgentKey],
) -> SuggestedAction {
    if category == ResponseCategory::CompleteWithData {
        return SuggestedAction::Accept;
    }
    if retry_count >= 2 {
        return SuggestedAction::Accept;
    }
    if !rag_had_results {
        return SuggestedAction::StopRetry;
    }
    if agent_history.len() >= 2 && agent_history[agent_history.len() - 1] == agent_history[agent_history.len() - 2]
    {
        return SuggestedAction::StopRetry;
    }
    if category == ResponseCategory::FallbackResponse && rag_had_results {
        return SuggestedAction::ReRoute;
    }
    SuggestedAction::Accept
}

fn evaluate_completeness(user_message: &str, agent_response: &str) -> UnitScore {
    if agent_response.len() < 10 {
        return UnitScore::zero();
    }
    let lower_message = user_message.to_lowercase();
    let question_indicators = ["qué", "cómo", "dónde", "cuándo", "por qué", "cuánto"]
        .iter()
        .filter(|w| lower_message.contains(*w))
        .count();

    let length = agent_response.chars().count();
    if question_indicators > 0 && length < 50 {
        return UnitScore::clamped(0.3);
    }
    let lower_response = agent_response.to_lowercase();
    if length > 100
        && ["información", "detalles", "proceso", "pasos"]
            .iter()
            .any(|w| lower_response.contains(w))
    {
        return UnitScore::clamped(0.9);
    }
    UnitScore::clamped((length as f64 / 200.0).min(0.8))
}

fn agent_relevance_keywords() -> &'static HashMap<&'static str, &'static [&'static str]> {
    static TABLE: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
        let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        m.insert(
            "product_agent",
            &["producto", "precio", "stock", "disponible", "características", "categoría", "tipo"],
        );
        m.insert("support_agent", &["problema", "ayuda", "soporte", "técnico", "falla"]);
        m.insert("tracking_agent", &["pedido", "envío", "seguimiento", "entrega"]);
        m.insert("invoice_agent", &["factura", "pago", "cobro", "recibo"]);
        m.insert("promotions_agent", &["descuento", "oferta", "promoción", "cupón"]);
        m
    });
    &TABLE
}

fn check_agent_relevance(user_message: &str, agent_name: &AgentKey) -> f64 {
    let lower = user_message.to_lowercase();
    let name = agent_name.clone().into_inner();
    let Some(keywords) = agent_relevance_keywords().get(name.as_str()) else {
        return 0.5;
    };
    if keywords.is_empty() {
        return 0.5;
    }
    let matches = keywords.iter().filter(|kw| lower.contains(*kw)).count();
    (matches as f64 / keywords.len() as f64 * 2.0).min(1.0)
}

fn evaluate_relevance(user_message: &str, agent_response: &str, agent_name: &AgentKey) -> UnitScore {
    if agent_response.is_empty() {
        return UnitScore::zero();
    }
    let user_words: std::collections::HashSet<&str> = user_message.to_lowercase().split_whitespace().collect();
    let lower_response = agent_response.to_lowercase();
    let response_words: std::collections::HashSet<&str> = lower_response.split_whitespace().collect();
    let overlap = if user_words.is_empty() {
        0.0
    } else {
        user_words.intersection(&response_words).count() as f64 / user_words.len() as f64
    };
    let agent_relevance = check_agent_relevance(user_message, agent_name);
    UnitScore::clamped(overlap * 0.6 + agent_relevance * 0.4)
}

fn evaluate_clarity(agent_response: &str) -> UnitScore {
    if agent_response.is_empty() {
        return UnitScore::zero();
    }
    let sentence_count = agent_response
        .split('.')
        .filter(|s| s.trim().len() > 5)
        .count()
        .max(1);
    let avg_sentence_length = agent_response.chars().count() as f64 / sentence_count as f64;

    let mut clarity = 0.8;
    if avg_sentence_length > 150.0 {
        clarity -= 0.3;
    } else if avg_sentence_length < 10.0 {
        clarity -= 0.2;
    }
    let lower = agent_response.to_lowercase();
    if ["primero", "segundo", "además", "finalmente"].iter().any(|w| lower.contains(w)) {
        clarity += 0.1;
    }
    UnitScore::clamped(clarity)
}

fn has_actionable_content(agent_response: &str) -> bool {
    const INDICATORS: &[&str] = &[
        "puedes", "debes", "recomiendo", "sugiero", "pasos", "proceso", "hacer", "seguir",
        "contactar", "verificar", "comprobar",
    ];
    let lower = agent_response.to_lowercase();
    INDICATORS.iter().any(|w| lower.contains(w))
}

fn provides_specific_info(agent_response: &str) -> bool {
    const INDICATORS: &[&str] = &[
        "precio", "costo", "disponible", "stock", "características", "modelo", "marca",
        "especificaciones", "número", "fecha",
    ];
    let lower = agent_response.to_lowercase();
    INDICATORS.iter().any(|w| lower.contains(w))
}

fn has_appropriate_tone(agent_response: &str) -> bool {
    const POSITIVE: &[&str] = &["gracias", "gusto", "ayudar", "servicio", "atención"];
    const NEGATIVE: &[&str] = &["no puedo", "no sé", "imposible", "error"];
    let lower = agent_response.to_lowercase();
    let positive = POSITIVE.iter().filter(|w| lower.contains(**w)).count();
    let negative = NEGATIVE.iter().filter(|w| lower.contains(**w)).count();
    positive > negative
}

fn evaluate_helpfulness(agent_response: &str) -> UnitScore {
    if agent_response.is_empty() {
        return UnitScore::zero();
    }
    let mut score = 0.5;
    if has_actionable_content(agent_response) {
        score += 0.2;
    }
    if provides_specific_info(agent_response) {
        score += 0.2;
    }
    if has_appropriate_tone(agent_response) {
        score += 0.1;
    }
    UnitScore::clamped(score)
}

/// Evaluates response quality across completeness, relevance, clarity, and
/// helpfulness, then categorizes and scores the response as a whole.
pub struct QualityEvaluator {
    thresholds: QualityThresholds,
}

/// Minimum scores a response should meet along each dimension; currently
/// informational (the source system exposes them for future tuning but the
/// overall-score computation does not branch on them directly).
#[derive(Debug, Clone, Copy)]
pub struct QualityThresholds {
    /// Minimum acceptable completeness score.
    pub response_completeness: f64,
    /// Minimum acceptable relevance score.
    pub response_relevance: f64,
    /// Minimum acceptable task-completion score.
    pub task_completion: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            response_completeness: 0.6,
            response_relevance: 0.7,
            task_completion: 0.8,
        }
    }
}

impl QualityEvaluator {
    /// Builds an evaluator with the given thresholds.
    #[must_use]
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    /// The configured thresholds.
    #[must_use]
    pub fn thresholds(&self) -> QualityThresholds {
        self.thresholds
    }

    /// Scores `agent_response` against `user_message`, using
    /// `agent_history`/`retry_count`/`rag_had_results` only to decide the
    /// suggested next action, not the score itself.
    #[must_use]
    pub fn evaluate(
        &self,
        user_message: &str,
        agent_response: &str,
        agent_name: &AgentKey,
        rag_had_results: bool,
        retry_count: u32,
        agent_history: &[AgentKey],
    ) -> QualityEvaluation {
        let query_type = detect_query_type(user_message);
        let fallback_score = calculate_fallback_score(agent_response);
        let found_data = detect_specific_data(agent_response);
        let has_specific = has_specific_data(&found_data, query_type);
        let category = categorize_response(fallback_score, has_specific, query_type);

        let completeness_score = evaluate_completeness(user_message, agent_response);
        let relevance_score = evaluate_relevance(user_message, agent_response, agent_name);
        let clarity_score = evaluate_clarity(agent_response);
        let helpfulness_score = evaluate_helpfulness(agent_response);

        let base_score: f64 = 0.3 * f64::from(completeness_score.into_inner())
            + 0.3 * f64::from(relevance_score.into_inner())
            + 0.2 * f64::from(clarity_score.into_inner())
            + 0.2 * f64::from(helpfulness_score.into_inner());

        let overall_score = adjust_by_category(base_score, category, fallback_score);
        let suggested_action = determine_action(category, rag_had_results, retry_count, agent_history);

        QualityEvaluation {
            overall_score,
            completeness_score,
            relevance_score,
            clarity_score,
            helpfulness_score,
            agent_name: agent_name.clone(),
            response_length: agent_response.chars().count(),
            category,
            suggested_action,
            fallback_score,
            rag_had_results,
            query_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> AgentKey {
        AgentKey::try_new(s).unwrap()
    }

    #[test]
    fn fallback_score_caps_at_one() {
        let response = "no encontre informacion. te recomiendo visitar nuestra pagina. puedo ayudarte con algo mas?";
        assert!(f64::from(calculate_fallback_score(response).into_inner()) >= 1.0 - 1e-9);
    }

    #[test]
    fn complete_response_with_names_is_corporate_complete() {
        let evaluator = QualityEvaluator::new(QualityThresholds::default());
        let eval = evaluator.evaluate(
            "quien es el ceo de la empresa",
            "El CEO es Juan Perez, fundador de la compañía en 2010.",
            &key("corporate_agent"),
            true,
            0,
            &[],
        );
        assert_eq!(eval.category, ResponseCategory::CompleteWithData);
        assert_eq!(eval.suggested_action, SuggestedAction::Accept);
    }

    #[test]
    fn fallback_with_rag_results_suggests_reroute() {
        let evaluator = QualityEvaluator::new(QualityThresholds::default());
        let eval = evaluator.evaluate(
            "cuanto sale el modulo de facturacion",
            "no tengo informacion sobre eso, te recomiendo visitar nuestra pagina web",
            &key("product_agent"),
            true,
            0,
            &[],
        );
        assert_eq!(eval.category, ResponseCategory::FallbackResponse);
        assert_eq!(eval.suggested_action, SuggestedAction::ReRoute);
    }

    #[test]
    fn no_rag_results_stops_retry_even_if_fallback() {
        let evaluator = QualityEvaluator::new(QualityThresholds::default());
        let eval = evaluator.evaluate(
            "cuanto sale el modulo de facturacion",
            "no tengo informacion sobre eso, te recomiendo visitar nuestra pagina web",
            &key("product_agent"),
            false,
            0,
            &[],
        );
        assert_eq!(eval.suggested_action, SuggestedAction::StopRetry);
    }

    #[test]
    fn same_agent_twice_in_a_row_stops_retry() {
        let evaluator = QualityEvaluator::new(QualityThresholds::default());
        let eval = evaluator.evaluate(
            "hola",
            "Respuesta parcial sin datos especificos.",
            &key("product_agent"),
            true,
            0,
            &[key("product_agent"), key("product_agent")],
        );
        assert_eq!(eval.suggested_action, SuggestedAction::StopRetry);
    }

    #[test]
    fn max_retries_forces_accept() {
        let evaluator = QualityEvaluator::new(QualityThresholds::default());
        let eval = evaluator.evaluate(
            "hola",
            "no tengo informacion, te recomiendo visitar nuestra pagina",
            &key("product_agent"),
            true,
            2,
            &[],
        );
        assert_eq!(eval.suggested_action, SuggestedAction::Accept);
    }
}
