//! Commit message generation under a token budget.

pub mod heuristic;
mod large_diff;
pub mod message;
pub mod prompt;
pub mod synth;

pub use heuristic::{
    ChangeStatus, Composed, FileChange, build_bullets, compose_from_bullets, compose_local,
    parse_file_changes, parse_name_status, parse_numstat,
};
pub use message::{CommitMessage, GENERIC_FALLBACK, MAX_TITLE_LEN, TitleIssue, strip_code_fences};
pub use synth::{
    LargeDiffPolicy, StagedChanges, Strategy, Synthesis, SynthesisSettings, Synthesizer,
};
