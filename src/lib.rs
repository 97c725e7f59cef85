//! autocommit - writes a conventional commit message for staged changes with
//! an LLM, then commits and pushes.
//!
//! # Overview
//!
//! Every model call is paid for out of a per-run token budget. The
//! synthesizer picks the cheapest strategy that fits: heuristic bullets from
//! file metadata, a single prompt, per-file summaries, or batched summaries
//! condensed until they fit. Whatever happens to the model, a run always
//! ends with a usable message.

pub mod budget;
pub mod commit;
pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod interact;
pub mod llm;
pub mod tokens;

// Re-export commonly used types
pub use budget::{BudgetLedger, ReservationMode};
pub use commit::{CommitMessage, LargeDiffPolicy, StagedChanges, Strategy, Synthesis, Synthesizer};
pub use config::Config;
pub use error::{CommitError, ConfigError, GitError, InvocationError, ParseError};
pub use llm::{InvokeRequest, ModelBackend};
