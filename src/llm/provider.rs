//! Mapping a model name to the backend that serves it.

use std::env;
use std::fmt;
use std::time::Duration;

use tracing::debug;

use super::backend::ModelBackend;
use super::claude_cli::ClaudeCliBackend;
use super::http::{HttpBackend, WireFormat};
use crate::error::InvocationError;

/// Model name prefix selecting the local Claude CLI.
pub const CLAUDE_CLI_PREFIX: &str = "claude-cli";

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    Mistral,
    Cohere,
    DeepSeek,
    XAi,
    Meta,
    Alibaba,
    ClaudeCli,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Google => "Google",
            Provider::Mistral => "Mistral",
            Provider::Cohere => "Cohere",
            Provider::DeepSeek => "DeepSeek",
            Provider::XAi => "xAI",
            Provider::Meta => "Meta",
            Provider::Alibaba => "Alibaba",
            Provider::ClaudeCli => "Claude CLI",
        }
    }

    /// Infer the provider from a model name prefix.
    pub fn infer(model: &str) -> Option<Provider> {
        let lower = model.to_lowercase();
        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| lower.starts_with(p));

        let provider = if starts(&[CLAUDE_CLI_PREFIX]) {
            Provider::ClaudeCli
        } else if starts(&["gpt-", "o1", "o3", "o4", "text-", "davinci"]) {
            Provider::OpenAi
        } else if starts(&["claude"]) {
            Provider::Anthropic
        } else if starts(&["gemini"]) {
            Provider::Google
        } else if starts(&["mistral", "devstral", "codestral", "pixtral", "ministral"]) {
            Provider::Mistral
        } else if starts(&["command"]) {
            Provider::Cohere
        } else if starts(&["deepseek"]) {
            Provider::DeepSeek
        } else if starts(&["grok"]) {
            Provider::XAi
        } else if starts(&["llama", "meta"]) {
            Provider::Meta
        } else if starts(&["qwen"]) {
            Provider::Alibaba
        } else {
            return None;
        };
        Some(provider)
    }

    /// Environment variable holding the API key.
    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Google => Some("GOOGLE_API_KEY"),
            Provider::Mistral => Some("MISTRAL_API_KEY"),
            Provider::Cohere => Some("COHERE_API_KEY"),
            Provider::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Provider::XAi => Some("XAI_API_KEY"),
            Provider::Meta => Some("META_AI_API_KEY"),
            Provider::Alibaba => Some("DASHSCOPE_API_KEY"),
            Provider::ClaudeCli => None,
        }
    }

    /// Base URL of the provider's HTTP API.
    pub fn base_url(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("https://api.openai.com/v1"),
            Provider::Anthropic => Some("https://api.anthropic.com"),
            Provider::Google => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            Provider::Mistral => Some("https://api.mistral.ai/v1"),
            Provider::Cohere => Some("https://api.cohere.ai/compatibility/v1"),
            Provider::DeepSeek => Some("https://api.deepseek.com"),
            Provider::XAi => Some("https://api.x.ai/v1"),
            Provider::Meta => Some("https://api.together.xyz/v1"),
            Provider::Alibaba => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
            Provider::ClaudeCli => None,
        }
    }

    pub fn wire_format(&self) -> Option<WireFormat> {
        match self {
            Provider::ClaudeCli => None,
            Provider::Anthropic => Some(WireFormat::AnthropicMessages),
            Provider::OpenAi => Some(WireFormat::OpenAiChat {
                completion_tokens_field: true,
            }),
            _ => Some(WireFormat::OpenAiChat {
                completion_tokens_field: false,
            }),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read a provider's API key from its environment variable.
fn api_key(provider: Provider, env_var: &'static str) -> Result<String, InvocationError> {
    env::var(env_var)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or(InvocationError::MissingApiKey {
            provider: provider.as_str(),
            env_var,
        })
}

/// Build the backend serving `model`.
///
/// `claude-cli` uses the CLI's default model; `claude-cli:<name>` picks one.
pub fn resolve_backend(
    model: &str,
    timeout: Duration,
) -> Result<Box<dyn ModelBackend>, InvocationError> {
    let provider =
        Provider::infer(model).ok_or_else(|| InvocationError::UnknownModel(model.to_string()))?;
    debug!("Model {model} resolved to provider {provider}");

    match (provider.wire_format(), provider.base_url(), provider.env_var()) {
        (Some(format), Some(base_url), Some(env_var)) => {
            let key = api_key(provider, env_var)?;
            Ok(Box::new(HttpBackend::new(format, base_url, key, timeout)))
        }
        _ => {
            let cli_model = model
                .split_once(':')
                .map(|(_, name)| name.trim().to_string())
                .filter(|name| !name.is_empty());
            let backend = ClaudeCliBackend::new(cli_model, timeout);
            backend.check_installed()?;
            Ok(Box::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_providers_from_prefixes() {
        assert_eq!(Provider::infer("gpt-4o-mini"), Some(Provider::OpenAi));
        assert_eq!(Provider::infer("o3-mini"), Some(Provider::OpenAi));
        assert_eq!(Provider::infer("claude-3-5-haiku-20241022"), Some(Provider::Anthropic));
        assert_eq!(Provider::infer("claude-cli"), Some(Provider::ClaudeCli));
        assert_eq!(Provider::infer("claude-cli:opus"), Some(Provider::ClaudeCli));
        assert_eq!(Provider::infer("Gemini-2.0-flash"), Some(Provider::Google));
        assert_eq!(Provider::infer("codestral-latest"), Some(Provider::Mistral));
        assert_eq!(Provider::infer("command-r-plus"), Some(Provider::Cohere));
        assert_eq!(Provider::infer("deepseek-chat"), Some(Provider::DeepSeek));
        assert_eq!(Provider::infer("grok-2"), Some(Provider::XAi));
        assert_eq!(Provider::infer("llama-3.1-70b"), Some(Provider::Meta));
        assert_eq!(Provider::infer("qwen-max"), Some(Provider::Alibaba));
        assert_eq!(Provider::infer("totally-unknown-model-xyz"), None);
    }

    #[test]
    fn unknown_model_is_rejected() {
        let err = resolve_backend("mystery-model", Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, InvocationError::UnknownModel(ref m) if m == "mystery-model"));
    }

    #[test]
    fn missing_api_key_names_the_variable() {
        temp_env::with_var_unset("DEEPSEEK_API_KEY", || {
            let err = resolve_backend("deepseek-chat", Duration::from_secs(1))
                .err()
                .unwrap();
            assert!(err.to_string().contains("DEEPSEEK_API_KEY"));
        });
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        temp_env::with_var("OPENAI_API_KEY", Some("   "), || {
            assert!(matches!(
                resolve_backend("gpt-4o", Duration::from_secs(1)),
                Err(InvocationError::MissingApiKey { env_var: "OPENAI_API_KEY", .. })
            ));
        });
    }

    #[test]
    fn http_backend_is_built_when_key_is_set() {
        temp_env::with_var("ANTHROPIC_API_KEY", Some("sk-test"), || {
            let backend = resolve_backend("claude-3-5-sonnet-20241022", Duration::from_secs(1))
                .unwrap();
            assert_eq!(backend.endpoint_host().as_deref(), Some("api.anthropic.com"));
        });
    }

    #[test]
    fn every_http_provider_has_key_and_url() {
        let http = [
            Provider::OpenAi,
            Provider::Anthropic,
            Provider::Google,
            Provider::Mistral,
            Provider::Cohere,
            Provider::DeepSeek,
            Provider::XAi,
            Provider::Meta,
            Provider::Alibaba,
        ];
        for provider in http {
            assert!(provider.env_var().is_some(), "{provider}");
            assert!(provider.base_url().is_some(), "{provider}");
            assert!(provider.wire_format().is_some(), "{provider}");
        }
        assert!(Provider::ClaudeCli.wire_format().is_none());
    }
}
