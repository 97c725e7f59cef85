//! HTTP model backends.
//!
//! Two wire formats cover every supported provider: the OpenAI-compatible
//! `/chat/completions` endpoint and Anthropic's `/v1/messages`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::{InvokeRequest, ModelBackend};
use crate::error::InvocationError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Request/response shape spoken by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `POST {base}/chat/completions` with a bearer token.
    OpenAiChat {
        /// Send `max_completion_tokens` instead of the older `max_tokens`.
        completion_tokens_field: bool,
    },
    /// `POST {base}/v1/messages` with an `x-api-key` header.
    AnthropicMessages,
}

/// A model reached over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    format: WireFormat,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(
        format: WireFormat,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            format,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
        }
    }

    fn build(&self, request: &InvokeRequest) -> RequestBuilder {
        match self.format {
            WireFormat::OpenAiChat {
                completion_tokens_field,
            } => {
                let mut messages = Vec::with_capacity(2);
                if let Some(system) = &request.system_prompt {
                    messages.push(ChatMessage {
                        role: "system",
                        content: system,
                    });
                }
                messages.push(ChatMessage {
                    role: "user",
                    content: &request.prompt,
                });
                let (max_tokens, max_completion_tokens) = if completion_tokens_field {
                    (None, Some(request.max_output_tokens))
                } else {
                    (Some(request.max_output_tokens), None)
                };
                let body = ChatRequest {
                    model: &request.model,
                    messages,
                    temperature: (!is_reasoning_model(&request.model)).then_some(request.temperature),
                    max_tokens,
                    max_completion_tokens,
                };
                self.client
                    .post(format!("{}/chat/completions", self.base_url))
                    .bearer_auth(&self.api_key)
                    .json(&body)
            }
            WireFormat::AnthropicMessages => {
                let body = MessagesRequest {
                    model: &request.model,
                    max_tokens: request.max_output_tokens,
                    temperature: request.temperature,
                    system: request.system_prompt.as_deref(),
                    messages: vec![ChatMessage {
                        role: "user",
                        content: &request.prompt,
                    }],
                };
                self.client
                    .post(format!("{}/v1/messages", self.base_url))
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body)
            }
        }
    }

    fn transport_error(&self, model: &str, error: reqwest::Error) -> InvocationError {
        if error.is_timeout() {
            InvocationError::Timeout {
                model: model.to_string(),
                secs: self.timeout.as_secs(),
            }
        } else {
            InvocationError::Network {
                model: model.to_string(),
                source: Box::new(error),
            }
        }
    }
}

#[async_trait]
impl ModelBackend for HttpBackend {
    async fn invoke(&self, request: &InvokeRequest) -> Result<String, InvocationError> {
        let model = request.model.as_str();
        debug!("POST {} ({model})", self.base_url);

        let response = self
            .build(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(model, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(model, e))?;

        if !status.is_success() {
            return Err(InvocationError::Provider {
                model: model.to_string(),
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        let content = match self.format {
            WireFormat::OpenAiChat { .. } => parse_chat_response(&text),
            WireFormat::AnthropicMessages => parse_messages_response(&text),
        };
        content.map_err(|detail| InvocationError::InvalidResponse {
            model: model.to_string(),
            detail,
        })
    }

    fn endpoint_host(&self) -> Option<String> {
        Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }
}

/// OpenAI reasoning models reject a custom temperature.
fn is_reasoning_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    ["o1", "o3", "o4", "gpt-5"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn parse_chat_response(body: &str) -> Result<String, String> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| e.to_string())?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or_else(|| "response contained no choices".to_string())
}

fn parse_messages_response(body: &str) -> Result<String, String> {
    let parsed: MessagesResponse = serde_json::from_str(body).map_err(|e| e.to_string())?;
    Ok(parsed
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect())
}

/// Provider error text, from the JSON envelope when there is one.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => body.trim().to_string(),
    }
}
