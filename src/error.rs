//! Error types for autocommit modules using thiserror.

use thiserror::Error;

/// Errors from a single model invocation.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("Request to {model} timed out after {secs} seconds")]
    Timeout { model: String, secs: u64 },

    #[error("Network error talking to {model}: {source}")]
    Network {
        model: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{model} rejected the request (HTTP {status}): {message}")]
    Provider {
        model: String,
        status: u16,
        message: String,
    },

    #[error("{model} returned an unreadable response: {detail}")]
    InvalidResponse { model: String, detail: String },

    #[error("Unknown model '{0}'. Use a name starting with gpt-, claude, gemini, mistral, command, deepseek, grok, llama or qwen")]
    UnknownModel(String),

    #[error("{provider} API key not found. Set the {env_var} environment variable")]
    MissingApiKey {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("Claude Code CLI not found. Install with: npm install -g @anthropic-ai/claude-code")]
    CliNotInstalled,

    #[error("Failed to spawn Claude process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Claude CLI exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
}

impl InvocationError {
    /// Whether the failure is transient (network or timeout) and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InvocationError::Timeout { .. } | InvocationError::Network { .. }
        )
    }
}

/// A name-status or numstat line that could not be parsed.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Malformed {source_kind} line {line_no}: '{line}'")]
pub struct ParseError {
    pub source_kind: &'static str,
    pub line_no: usize,
    pub line: String,
}

/// Errors from git operations.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository (searched upward from {path}): {source}")]
    NotARepository {
        path: String,
        #[source]
        source: git2::Error,
    },

    #[error("Repository has no working directory (bare repositories are not supported)")]
    BareRepository,

    #[error("Failed to read repository state: {0}")]
    State(#[source] git2::Error),

    #[error("Failed to run git {operation}: {source}")]
    Spawn {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {operation} failed: {stderr}")]
    CommandFailed { operation: String, stderr: String },

    #[error("Failed to back up the index: {0}")]
    Backup(#[source] std::io::Error),
}

/// Errors from the configuration store.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine the user config directory")]
    NoConfigDir,

    #[error("Token budget must be a positive integer, got {0}")]
    InvalidBudget(i64),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write config: {0}")]
    WriteFailed(#[source] std::io::Error),
}

/// Errors that abort a commit run.
#[derive(Error, Debug)]
pub enum CommitError {
    #[error(
        "No staged files found. Stage files first:\n  git add <files>    # specific files\n  git add .          # everything in the current directory"
    )]
    NoStagedChanges,

    #[error("No staged changes to commit after filtering lockfiles and binaries")]
    NoChanges,

    #[error(
        "Token budget exceeded while composing the final commit message ({spent} of {ceiling} tokens used). Aborting."
    )]
    BudgetExceeded { spent: usize, ceiling: usize },

    #[error("Operation cancelled by user due to large diff")]
    Cancelled,

    #[error("Repository is in an unsafe state: {0}. Resolve it before committing")]
    UnsafeRepository(String),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
