//! The commit message produced by a run.

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;

/// Maximum title length before a warning is shown.
pub const MAX_TITLE_LEN: usize = 50;

/// Message used when nothing better can be produced.
pub const GENERIC_FALLBACK: &str = "chore: update files\n\nGeneral file updates and improvements";

static CONVENTIONAL_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<type>[a-z]+)(\([^)]*\))?!?: (?P<subject>.+)$").expect("Invalid regex")
});

/// A conventional commit message: `type: subject`, a blank line, the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    pub title: String,
    pub body: String,
}

/// A title rule the message breaks. Shown to the user, never enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleIssue {
    TooLong(usize),
    MissingType,
    NotLowercase,
}

impl fmt::Display for TitleIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TitleIssue::TooLong(len) => {
                write!(f, "title is {len} characters (max {MAX_TITLE_LEN})")
            }
            TitleIssue::MissingType => write!(f, "title is not in 'type: subject' form"),
            TitleIssue::NotLowercase => write!(f, "title subject should start lowercase"),
        }
    }
}

impl CommitMessage {
    /// Parse free text: the first non-empty line is the title, the rest the body.
    ///
    /// Returns `None` for blank text.
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.trim().lines();
        let title = lines.next()?.trim().to_string();
        let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
        Some(Self { title, body })
    }

    /// Parse, falling back to [`GENERIC_FALLBACK`] for blank text.
    pub fn parse_or_fallback(text: &str) -> Self {
        Self::parse(text).unwrap_or_else(Self::fallback)
    }

    pub fn fallback() -> Self {
        Self {
            title: "chore: update files".to_string(),
            body: "General file updates and improvements".to_string(),
        }
    }

    /// Format the message for `git commit -m`.
    pub fn format(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.body)
        }
    }

    /// Prefix a user comment as the first paragraph.
    pub fn with_comment(&self, comment: &str) -> Self {
        let comment = comment.trim();
        if comment.is_empty() {
            return self.clone();
        }
        Self::parse(&format!("{comment}\n\n{}", self.format())).unwrap_or_else(|| self.clone())
    }

    /// Title rules this message breaks.
    pub fn title_issues(&self) -> Vec<TitleIssue> {
        let mut issues = Vec::new();
        let len = self.title.chars().count();
        if len > MAX_TITLE_LEN {
            issues.push(TitleIssue::TooLong(len));
        }
        match CONVENTIONAL_TITLE.captures(&self.title) {
            Some(caps) => {
                let starts_upper = caps
                    .name("subject")
                    .and_then(|m| m.as_str().chars().next())
                    .is_some_and(char::is_uppercase);
                if starts_upper {
                    issues.push(TitleIssue::NotLowercase);
                }
            }
            None => issues.push(TitleIssue::MissingType),
        }
        issues
    }
}

impl fmt::Display for CommitMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// Remove surrounding triple-backtick fences from a model response.
///
/// A language tag on the opening fence goes with it.
pub fn strip_code_fences(text: &str) -> String {
    let mut trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        trimmed = match rest.split_once('\n') {
            Some((tag, body)) if !tag.trim().contains(' ') => body,
            _ => rest,
        };
    }
    if let Some(rest) = trimmed.trim_end().strip_suffix("```") {
        trimmed = rest;
    }
    trimmed.trim_matches('`').trim().to_string()
}
