//! LLM provider abstraction
//!
//! Provides a common interface for the hosted completion API.

mod error;
mod groq;
mod models;
mod types;


pub use error::{LlmError, LlmErrorKind};
pub use groq::{GroqService, DEFAULT_BASE_URL};
pub use models::{all_models, is_supported, ModelDef};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Short provider name used in logs
    fn provider_name(&self) -> &'static str;
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    provider = self.inner.provider_name(),
                    model = %request.model,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    finish_reason = ?response.finish_reason,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    provider = self.inner.provider_name(),
                    model = %request.model,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = ?e.kind,
                    transient = e.kind.is_transient(),
                    retry_after_ms = ?e.retry_after.map(|d| d.as_millis()),
                    "LLM request failed"
                );
            }
        }

        result
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}
