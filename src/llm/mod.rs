//! Model invocation: backends, provider resolution, budget metering and retry.

pub mod backend;
pub mod claude_cli;
pub mod context;
pub mod http;
pub mod metered;
pub mod provider;
pub mod retry;

pub use backend::{InvokeRequest, ModelBackend, Usage, estimate_usage};
pub use context::{context_window, effective_input_limit};
pub use metered::{MeteredError, call_metered};
pub use provider::{Provider, resolve_backend};
pub use retry::{RetryError, RetryPolicy, retry_with_backoff};
