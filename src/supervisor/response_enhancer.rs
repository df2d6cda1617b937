//! Optional response rewriting (C10d). Disabled by default; only runs when
//! a turn is ending with a mediocre score and a language model is
//! configured. Never blocks the turn on failure.

use async_trait::async_trait;
use thiserror::Error;

/// A chat-completion backend the enhancer can call. Kept separate from any
/// particular provider's SDK so tests can supply a stub.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Completes `prompt` at the given sampling temperature.
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, CompletionError>;
}

/// Failure calling the completion backend.
#[derive(Debug, Error)]
#[error("completion backend failed: {0}")]
pub struct CompletionError(pub String);

const MIN_ENHANCED_LENGTH: usize = 20;

const BOILERPLATE_PREFIXES: &[&str] = &[
    "enhanced response:",
    "respuesta mejorada:",
    "here is the enhanced response:",
    "improved response:",
];

fn language_instruction(language: &str) -> &'static str {
    match language {
        "en" => "Respond in English.",
        "pt" => "Responda en portugués.",
        _ => "Responde en español.",
    }
}

fn build_prompt(user_message: &str, original_response: &str, language: &str) -> String {
    format!(
        "The following response answers a user's question but could be clearer. \
         Rewrite it to be more natural and complete while preserving every fact \
         it states and its overall tone. Do not invent new information.\n\n\
         {}\n\n\
         User question: {user_message}\n\
         Original response: {original_response}\n\
         Rewritten response:",
        language_instruction(language)
    )
}

fn strip_think_tags(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find("<think>") {
            Some(start) => {
                result.push_str(&rest[..start]);
                rest = match rest[start..].find("</think>") {
                    Some(end) => &rest[start + end + "</think>".len()..],
                    None => "",
                };
            }
            None => {
                result.push_str(rest);
                break;
            }
        }
    }
    result
}

fn strip_boilerplate_prefix(text: &str) -> &str {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    for prefix in BOILERPLATE_PREFIXES {
        if lower.starts_with(prefix) {
            return trimmed[prefix.len()..].trim_start();
        }
    }
    trimmed
}

fn clean_enhanced_text(raw: &str) -> String {
    strip_boilerplate_prefix(&strip_think_tags(raw)).trim().to_string()
}

/// Rewrites a worker's response for tone and completeness via an LLM,
/// discarding the result on any failure or implausibly short output.
pub struct ResponseEnhancer<C: CompletionClient> {
    client: Option<C>,
}

impl<C: CompletionClient> ResponseEnhancer<C> {
    /// Builds an enhancer around an optional completion client. With `None`,
    /// `enhance` always returns `None` without attempting a call.
    #[must_use]
    pub fn new(client: Option<C>) -> Self {
        Self { client }
    }

    /// Attempts to produce a better version of `original_response`. Returns
    /// `None` if no client is configured, the call fails, or the cleaned
    /// result is too short to trust.
    pub async fn enhance(&self, user_message: &str, original_response: &str, language: &str) -> Option<String> {
        let client = self.client.as_ref()?;
        let prompt = build_prompt(user_message, original_response, language);
        let raw = client.complete(&prompt, 0.7).await.ok()?;
        let cleaned = clean_enhanced_text(&raw);
        if cleaned.chars().count() <= MIN_ENHANCED_LENGTH {
            return None;
        }
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubClient(String);

    #[async_trait]
    impl CompletionClient for StubClient {
        async fn complete(&self, _prompt: &str, _temperature: f32) -> Result<String, CompletionError> {
            Ok(self.0.clone())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl CompletionClient for FailingClient {
        async fn complete(&self, _prompt: &str, _temperature: f32) -> Result<String, CompletionError> {
            Err(CompletionError("backend unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn strips_think_tags_and_prefix() {
        let enhancer = ResponseEnhancer::new(Some(StubClient(
            "<think>reasoning here</think>Enhanced response: Claro, aquí tienes la información completa."
                .to_string(),
        )));
        let result = enhancer.enhance("hola", "respuesta original", "es").await;
        assert_eq!(
            result.as_deref(),
            Some("Claro, aquí tienes la información completa.")
        );
    }

    #[tokio::test]
    async fn discards_too_short_result() {
        let enhancer = ResponseEnhancer::new(Some(StubClient("Ok.".to_string())));
        let result = enhancer.enhance("hola", "respuesta original", "es").await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn backend_failure_yields_none() {
        let enhancer = ResponseEnhancer::new(Some(FailingClient));
        let result = enhancer.enhance("hola", "respuesta original", "es").await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn no_client_configured_yields_none() {
        let enhancer: ResponseEnhancer<StubClient> = ResponseEnhancer::new(None);
        let result = enhancer.enhance("hola", "respuesta original", "es").await;
        assert!(result.is_none());
    }
}
