//! Completion client
//!
//! One persona-steered round trip to the hosted LLM. Every call is a fresh
//! two-message exchange (system prompt + user utterance); no conversation
//! history is carried between turns.

use crate::llm::{LlmError, LlmMessage, LlmRequest, SystemContent};
use crate::runtime::LlmClient;

/// Output length cap for every completion
pub const MAX_TOKENS: u32 = 100;

/// Sampling temperature for every completion
pub const TEMPERATURE: f32 = 1.2;

/// System prompt fixing the persona and asking for brevity
pub fn system_prompt(persona: &str) -> String {
    format!("You are a {persona}. You reply with very short answers.")
}

/// Build the completion request for one turn
pub fn build_request(persona: &str, user_input: &str, model: &str) -> LlmRequest {
    LlmRequest {
        model: model.to_string(),
        system: vec![SystemContent::new(system_prompt(persona))],
        messages: vec![LlmMessage::user(user_input)],
        max_tokens: Some(MAX_TOKENS),
        temperature: Some(TEMPERATURE),
    }
}

/// Generate a reply for `user_input` as `persona` using `model`.
///
/// Returns the text of the first completion choice. Failures are returned
/// classified; nothing is retried.
pub async fn generate_response<C>(
    client: &C,
    persona: &str,
    user_input: &str,
    model: &str,
) -> Result<String, LlmError>
where
    C: LlmClient + ?Sized,
{
    let request = build_request(persona, user_input, model);
    let response = client.complete(&request).await?;
    Ok(response.text)
}
