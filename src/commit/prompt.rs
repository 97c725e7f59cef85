//! Prompt construction for every model call in the pipeline.

use std::sync::LazyLock;

use regex_lite::Regex;

/// Instructions shared by every prompt that asks for a finished message.
pub const PROMPT_HEADER: &str = r#"You are writing a Git commit message for the staged changes below.

## Guidelines
- Describe only the staged changes shown.
- Do not add advertising or "generated with" lines.
- Respond with the commit message only, no surrounding commentary.

## Format
```
<type>: <title>

<one-line summary>
<bullet points describing what changed>
```

## Example
```
feat(auth): add JWT login flow

Authentication overhaul
- Validate JWT tokens on every request
- Document the token lifecycle
```

## Rules
- Title is lowercase, at most 50 characters, no trailing period.
- Type is one of: feat, fix, chore, docs, refactor, test, style, perf.
- The summary line states the high-level purpose.
- Bullets are short and high-level; the body explains why where it helps.
- Avoid vague titles such as "update" or "fix stuff".
- Do not repeat the title in the summary.

---
"#;

/// Completion caps, in tokens, for each kind of call.
pub const FILE_BULLET_COMPLETION: u32 = 64;
pub const BATCH_SUMMARY_COMPLETION: u32 = 200;
pub const CONDENSE_COMPLETION: u32 = 150;
pub const FINAL_FROM_BULLETS_COMPLETION: u32 = 192;
pub const FINAL_FROM_SUMMARIES_COMPLETION: u32 = 256;
pub const SINGLE_SHOT_COMPLETION: u32 = 192;

/// Prompt for a single call over the whole staged diff.
pub fn single_shot_prompt(diff: &str) -> String {
    format!("{PROMPT_HEADER}Staged diff:\n\n{diff}")
}

/// Prompt asking for one bullet describing a single file's diff.
pub fn file_bullet_prompt(chunk: &str) -> String {
    format!(
        "Summarise this git diff as ONE bullet of at most 20 words. Start with a verb (Add, Fix, Refactor, ...):\n\n{chunk}"
    )
}

/// Final prompt over per-file bullets.
pub fn final_from_bullets_prompt(bullets: &str, sampled: bool) -> String {
    let source = if sampled {
        "per-file bullets for the largest files (the rest are counted at the end)"
    } else {
        "per-file bullets"
    };
    format!("{PROMPT_HEADER}Below are {source}. Write the final commit message:\n\n{bullets}")
}

/// Final prompt over heuristic bullets built from file status data.
pub fn heuristic_compose_prompt(bullets: &str) -> String {
    format!(
        "{PROMPT_HEADER}Below is a summary of the staged changes (no raw diff). Write the final commit message:\n\n{bullets}"
    )
}

/// Prompt summarizing a batch of file diffs in a few bullets.
pub fn batch_summary_prompt(batch: &str) -> String {
    format!(
        "Summarise these git diff changes in 2-5 bullet points. Start each bullet with a verb (Add, Fix, Update, Remove, ...) and keep it under 15 words:\n\n{batch}"
    )
}

/// Prompt condensing a run of summaries into fewer bullets.
pub fn condense_prompt(summaries: &str) -> String {
    format!(
        "Condense these change summaries into 2-3 key bullet points. Keep the most important changes and start each with a verb:\n\n{summaries}"
    )
}

/// Header of the final prompt over batch summaries; the summaries follow it.
pub fn final_from_summaries_header() -> String {
    format!("{PROMPT_HEADER}Below are summaries of every change in this commit. Write the final commit message:\n\n")
}

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    // CSI sequences plus two-byte escapes.
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b[@-Z\\-_]").expect("Invalid regex")
});

/// Sanitize diff text for inclusion in a prompt.
///
/// Removes ANSI escape sequences and control characters other than
/// newlines and tabs. Carriage returns from CRLF files are dropped.
pub fn sanitize_diff(text: &str) -> String {
    let without_ansi = ANSI_ESCAPE.replace_all(text, "");
    without_ansi
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}
