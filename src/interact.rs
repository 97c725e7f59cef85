//! The interactive surface: the few decisions a user can make mid-run.

use std::fmt;

use dialoguer::{Confirm, Input, Select};

/// How to handle a diff too large for one prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LargeDiffChoice {
    /// Summarize in batches, then combine the summaries.
    Split,
    /// Cut the diff at the limit and send it in one prompt.
    Truncate,
    /// Abort the run.
    Cancel,
}

impl fmt::Display for LargeDiffChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LargeDiffChoice::Split => "split",
            LargeDiffChoice::Truncate => "truncate",
            LargeDiffChoice::Cancel => "cancel",
        })
    }
}

/// Decisions deferred to the user.
///
/// Implementations must always return promptly; [`NonInteractive`] answers
/// every question with a fixed default.
#[cfg_attr(test, mockall::automock)]
pub trait Prompter: Send + Sync {
    fn is_interactive(&self) -> bool;

    /// A hand-written message to use when generation failed.
    fn fallback_message(&self) -> Option<String>;

    /// What to do with a diff of `diff_tokens` against a `limit`.
    fn large_diff_strategy(&self, diff_tokens: usize, limit: usize) -> LargeDiffChoice;

    /// A comment to prefix to the generated message.
    fn commit_comment(&self) -> Option<String>;

    /// Whether to go ahead and commit.
    fn confirm_commit(&self) -> bool;
}

/// Terminal prompts via `dialoguer`.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        true
    }

    fn fallback_message(&self) -> Option<String> {
        println!();
        println!("Could not generate a commit message.");
        Input::<String>::new()
            .with_prompt("Enter a commit message (empty for a generic one)")
            .allow_empty(true)
            .interact_text()
            .ok()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    }

    fn large_diff_strategy(&self, diff_tokens: usize, limit: usize) -> LargeDiffChoice {
        println!();
        println!("Large diff: {diff_tokens} tokens (limit: {limit} tokens)");
        let items = [
            "Split & summarize (recommended, uses more tokens)",
            "Truncate (cheaper, may miss later changes)",
            "Cancel",
        ];
        match Select::new()
            .with_prompt("How should the diff be handled?")
            .items(&items)
            .default(0)
            .interact()
        {
            Ok(0) => LargeDiffChoice::Split,
            Ok(1) => LargeDiffChoice::Truncate,
            _ => LargeDiffChoice::Cancel,
        }
    }

    fn commit_comment(&self) -> Option<String> {
        Input::<String>::new()
            .with_prompt("Add a comment to prefix (optional)")
            .allow_empty(true)
            .interact_text()
            .ok()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    }

    fn confirm_commit(&self) -> bool {
        Confirm::new()
            .with_prompt("Commit with this message?")
            .default(true)
            .interact()
            .unwrap_or(false)
    }
}

/// Fixed answers for `--yes` and scripted runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractive;

impl Prompter for NonInteractive {
    fn is_interactive(&self) -> bool {
        false
    }

    fn fallback_message(&self) -> Option<String> {
        None
    }

    fn large_diff_strategy(&self, _diff_tokens: usize, _limit: usize) -> LargeDiffChoice {
        LargeDiffChoice::Split
    }

    fn commit_comment(&self) -> Option<String> {
        None
    }

    fn confirm_commit(&self) -> bool {
        true
    }
}
