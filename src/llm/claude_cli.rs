//! Claude CLI backend.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::backend::{InvokeRequest, ModelBackend};
use crate::error::InvocationError;

const DEFAULT_PROGRAM: &str = "claude";

/// Runs prompts through the locally installed `claude` CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCliBackend {
    program: String,
    model: Option<String>,
    timeout: Duration,
}

impl ClaudeCliBackend {
    /// `model` is passed through as `--model` when set.
    pub fn new(model: Option<String>, timeout: Duration) -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            model,
            timeout,
        }
    }

    /// Use a different executable than `claude`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Check the CLI is on `PATH`.
    ///
    /// Uses the `which` crate for cross-platform executable detection.
    pub fn check_installed(&self) -> Result<(), InvocationError> {
        which::which(&self.program)
            .map(|_| ())
            .map_err(|_| InvocationError::CliNotInstalled)
    }
}

#[async_trait]
impl ModelBackend for ClaudeCliBackend {
    async fn invoke(&self, request: &InvokeRequest) -> Result<String, InvocationError> {
        let prompt = match &request.system_prompt {
            Some(system) => format!("{system}\n\n{}", request.prompt),
            None => request.prompt.clone(),
        };

        let mut command = Command::new(&self.program);
        command
            .arg("-p")
            .arg(&prompt)
            .arg("--output-format")
            .arg("json");
        if let Some(model) = &self.model {
            command.arg("--model").arg(model);
        }
        debug!("Running {} ({:?})", self.program, self.model);

        let output = timeout(
            self.timeout,
            command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| InvocationError::Timeout {
            model: request.model.clone(),
            secs: self.timeout.as_secs(),
        })?
        .map_err(InvocationError::SpawnFailed)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let code = output.status.code().unwrap_or(-1);
            return Err(InvocationError::NonZeroExit { code, stderr });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        unwrap_envelope(&request.model, &stdout)
    }
}

/// The JSON document printed by `claude --output-format json`.
#[derive(Deserialize)]
struct ResultEnvelope {
    #[serde(default)]
    is_error: bool,
    result: String,
}

/// Pull the completion out of the CLI's result envelope.
///
/// Output that is not an envelope is returned as-is.
fn unwrap_envelope(model: &str, stdout: &str) -> Result<String, InvocationError> {
    match serde_json::from_str::<ResultEnvelope>(stdout.trim()) {
        Ok(envelope) if envelope.is_error => Err(InvocationError::InvalidResponse {
            model: model.to_string(),
            detail: envelope.result,
        }),
        Ok(envelope) => Ok(envelope.result),
        Err(_) => Ok(stdout.trim().to_string()),
    }
}
