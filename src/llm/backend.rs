//! The model capability every synthesis path calls through.

use async_trait::async_trait;

use crate::error::InvocationError;
use crate::tokens::count_tokens;

/// One model call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    pub model: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl InvokeRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.2,
            max_output_tokens: 256,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Estimated prompt-side tokens, system prompt included.
    pub fn prompt_tokens(&self) -> usize {
        count_tokens(&self.prompt) + self.system_prompt.as_deref().map_or(0, count_tokens)
    }
}

/// A remote (or local) model that maps a prompt to text.
///
/// Implementations classify failures into [`InvocationError`] variants so
/// callers can decide whether to retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send the request and return the completion text.
    async fn invoke(&self, request: &InvokeRequest) -> Result<String, InvocationError>;

    /// Host to probe when diagnosing repeated transport failures.
    fn endpoint_host(&self) -> Option<String> {
        None
    }
}

/// Estimated token usage of a completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl Usage {
    pub fn total(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Estimate usage by applying the token estimator to both sides.
pub fn estimate_usage(request: &InvokeRequest, response: &str) -> Usage {
    Usage {
        prompt_tokens: request.prompt_tokens(),
        completion_tokens: count_tokens(response),
    }
}
