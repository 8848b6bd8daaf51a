//! Groq provider implementation (`OpenAI`-compatible chat completions)

use super::types::{LlmMessage, LlmRequest, LlmResponse, Usage};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Default Groq API base
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Groq chat completions service
pub struct GroqService {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GroqService {
    /// Create a service against `base_url` (defaults to the public Groq API).
    ///
    /// No client-level timeout is set; the runtime bounds each completion.
    pub fn new(api_key: String, base_url: Option<&str>) -> Result<Self, LlmError> {
        let base = base_url.unwrap_or(DEFAULT_BASE_URL);
        let endpoint = format!("{}/chat/completions", base.trim_end_matches('/'));

        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint,
        })
    }

    pub(crate) fn translate_request(request: &LlmRequest) -> GroqRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if !request.system.is_empty() {
            let system_text = request
                .system
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");

            messages.push(GroqMessage {
                role: "system".to_string(),
                content: Some(system_text),
            });
        }

        messages.extend(request.messages.iter().map(Self::translate_message));

        GroqRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        }
    }

    fn translate_message(msg: &LlmMessage) -> GroqMessage {
        GroqMessage {
            role: msg.role.as_str().to_string(),
            content: Some(msg.content.clone()),
        }
    }

    pub(crate) fn normalize_response(resp: GroqResponse) -> Result<LlmResponse, LlmError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::unknown("No choices in response"))?;

        let usage = resp.usage.map_or_else(Usage::default, |u| Usage {
            input_tokens: u64::from(u.prompt_tokens),
            output_tokens: u64::from(u.completion_tokens),
        });

        Ok(LlmResponse {
            text: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage,
        })
    }

    fn classify_status(status: reqwest::StatusCode, error: GroqError) -> LlmError {
        let message = error.message;
        if error.code.as_deref() == Some("model_not_found") {
            return LlmError::model_not_found(format!("Model not found: {message}"));
        }
        match status.as_u16() {
            401 | 403 => LlmError::auth(format!("Authentication failed: {message}")),
            404 => LlmError::model_not_found(format!("Model not found: {message}")),
            429 => LlmError::rate_limit(format!("Rate limit exceeded: {message}")),
            400 | 422 => LlmError::invalid_request(format!("Invalid request: {message}")),
            500..=599 => LlmError::server_error(format!("Server error: {message}")),
            _ => LlmError::unknown(format!("HTTP {status}: {message}")),
        }
    }
}

#[async_trait]
impl LlmService for GroqService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let groq_request = Self::translate_request(request);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&groq_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::timeout(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::network(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(std::time::Duration::from_secs);
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            if let Ok(error_resp) = serde_json::from_str::<GroqErrorResponse>(&body) {
                let err = Self::classify_status(status, error_resp.error);
                return Err(match retry_after {
                    Some(delay) => err.with_retry_after(delay),
                    None => err,
                });
            }
            return Err(LlmError::unknown(format!("HTTP {status} error: {body}")));
        }

        let groq_response: GroqResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        Self::normalize_response(groq_response)
    }

    fn provider_name(&self) -> &'static str {
        "groq"
    }
}

// Groq API types

#[derive(Debug, Serialize)]
pub(crate) struct GroqRequest {
    pub(crate) model: String,
    pub(crate) messages: Vec<GroqMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) temperature: Option<f32>,
    pub(crate) stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GroqMessage {
    pub(crate) role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GroqResponse {
    pub(crate) choices: Vec<GroqChoice>,
    #[serde(default)]
    pub(crate) usage: Option<GroqUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GroqChoice {
    pub(crate) message: GroqMessage,
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
pub(crate) struct GroqUsage {
    pub(crate) prompt_tokens: u32,
    pub(crate) completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GroqErrorResponse {
    error: GroqError,
}

#[derive(Debug, Deserialize)]
struct GroqError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}
