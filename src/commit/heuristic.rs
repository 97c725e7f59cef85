//! Change bullets built from `git diff --name-status` / `--numstat`.
//!
//! This is the cheapest strategy: bullets come straight from file metadata
//! and at most one small model call turns them into a message. When even
//! that call is unaffordable the message is composed locally.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use super::message::strip_code_fences;
use super::prompt::{FINAL_FROM_BULLETS_COMPLETION, heuristic_compose_prompt};
use crate::budget::{BudgetLedger, ReservationMode};
use crate::error::ParseError;
use crate::llm::{InvokeRequest, MeteredError, ModelBackend, call_metered};

/// Bullets sent to the model at most.
const MAX_COMPOSE_BULLETS: usize = 200;

/// Bullets listed in a locally composed body.
const LOCAL_BODY_BULLETS: usize = 10;

/// How a staged file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
}

impl ChangeStatus {
    fn from_code(code: char) -> Option<Self> {
        match code {
            'A' => Some(ChangeStatus::Added),
            'M' | 'T' => Some(ChangeStatus::Modified),
            'D' => Some(ChangeStatus::Deleted),
            'R' => Some(ChangeStatus::Renamed),
            'C' => Some(ChangeStatus::Copied),
            _ => None,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            ChangeStatus::Added => "Add",
            ChangeStatus::Modified => "Update",
            ChangeStatus::Deleted => "Remove",
            ChangeStatus::Renamed => "Rename",
            ChangeStatus::Copied => "Copy",
        }
    }
}

/// One staged file with its line counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub status: ChangeStatus,
    pub lines_added: usize,
    pub lines_deleted: usize,
}

/// Coarse grouping used for bullet wording and the local commit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Test,
    Docs,
    Chore,
    Code,
}

impl Category {
    /// Classify a path by substring and extension.
    pub fn of(path: &str) -> Self {
        let p = path.to_lowercase();
        if p.contains("test") || p.ends_with("_test.go") || p.contains("/tests/") {
            return Category::Test;
        }
        if ["readme", "docs/", "/doc/", ".md"].iter().any(|s| p.contains(s)) {
            return Category::Docs;
        }
        let lockfiles = [".lock", "bun.lockb", "yarn.lock", "pnpm-lock.yaml", "package-lock.json"];
        if lockfiles.iter().any(|s| p.ends_with(s)) {
            return Category::Chore;
        }
        let config = ["config/", "/config", ".toml", ".yaml", ".yml", ".json"];
        if config.iter().any(|s| p.contains(s)) {
            return Category::Chore;
        }
        Category::Code
    }

    /// Words naming the category inside a bullet.
    fn clause(self) -> &'static str {
        match self {
            Category::Test => "tests",
            Category::Docs => "docs",
            Category::Chore => "tooling/config",
            Category::Code => "code",
        }
    }

    /// Conventional commit type and title for a locally composed message.
    fn local_title(self) -> (&'static str, &'static str) {
        match self {
            Category::Test => ("test", "update tests"),
            Category::Docs => ("docs", "update docs"),
            Category::Chore => ("chore", "maintenance updates"),
            Category::Code => ("chore", "update code"),
        }
    }

    /// Recover the category from a bullet's wording.
    fn of_bullet(bullet: &str) -> Self {
        [Category::Test, Category::Docs, Category::Chore]
            .into_iter()
            .find(|c| bullet.contains(&format!(" {} in ", c.clause())))
            .unwrap_or(Category::Code)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.clause())
    }
}

/// Parse `git diff --cached --name-status` output into `(path, status)`
/// pairs in input order.
///
/// Renames and copies resolve to their destination path. A path listed
/// twice keeps its first position and its last status.
pub fn parse_name_status(output: &str) -> Result<Vec<(String, ChangeStatus)>, ParseError> {
    let mut entries: Vec<(String, ChangeStatus)> = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let malformed = || ParseError {
            source_kind: "name-status",
            line_no: idx + 1,
            line: line.to_string(),
        };
        let parts: Vec<&str> = line.split('\t').collect();
        let code = parts[0].trim().chars().next().ok_or_else(malformed)?;
        let status = ChangeStatus::from_code(code).ok_or_else(malformed)?;
        let path = match status {
            ChangeStatus::Renamed | ChangeStatus::Copied => parts.get(2),
            _ => parts.get(1),
        }
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .ok_or_else(malformed)?;

        match entries.iter_mut().find(|(p, _)| p == path) {
            Some(entry) => entry.1 = status,
            None => entries.push((path.to_string(), status)),
        }
    }
    Ok(entries)
}

/// Parse `git diff --cached --numstat` output into per-path line counts.
///
/// Binary files (`-`) count as zero. Rename paths such as
/// `src/{old.rs => new.rs}` are keyed by their destination.
pub fn parse_numstat(output: &str) -> Result<HashMap<String, (usize, usize)>, ParseError> {
    let mut stats = HashMap::new();
    for (idx, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.splitn(3, '\t').collect();
        let &[added, deleted, path] = parts.as_slice() else {
            return Err(ParseError {
                source_kind: "numstat",
                line_no: idx + 1,
                line: line.to_string(),
            });
        };
        let count = |s: &str| s.trim().parse::<usize>().unwrap_or(0);
        stats.insert(
            rename_destination(path.trim()),
            (count(added), count(deleted)),
        );
    }
    Ok(stats)
}

/// Destination of a numstat rename path; other paths are returned as-is.
fn rename_destination(path: &str) -> String {
    if let (Some(open), Some(close)) = (path.find('{'), path.find('}'))
        && open < close
        && let Some((_, new)) = path[open + 1..close].split_once(" => ")
    {
        let joined = format!("{}{}{}", &path[..open], new, &path[close + 1..]);
        return joined.replace("//", "/");
    }
    match path.split_once(" => ") {
        Some((_, new)) => new.to_string(),
        None => path.to_string(),
    }
}

/// Join name-status and numstat output into file changes.
///
/// `numstat` is optional; files it does not mention get zero counts.
pub fn parse_file_changes(
    name_status: &str,
    numstat: Option<&str>,
) -> Result<Vec<FileChange>, ParseError> {
    let statuses = parse_name_status(name_status)?;
    let stats = numstat.map(parse_numstat).transpose()?.unwrap_or_default();
    Ok(statuses
        .into_iter()
        .map(|(path, status)| {
            let (lines_added, lines_deleted) = stats.get(&path).copied().unwrap_or((0, 0));
            FileChange {
                path,
                status,
                lines_added,
                lines_deleted,
            }
        })
        .collect())
}

/// One bullet per file, exact duplicates removed, first-seen order kept.
pub fn build_bullets(changes: &[FileChange]) -> Vec<String> {
    let mut bullets: Vec<String> = Vec::with_capacity(changes.len());
    for change in changes {
        let bullet = bullet_for(change);
        if !bullets.contains(&bullet) {
            bullets.push(bullet);
        }
    }
    bullets
}

fn bullet_for(change: &FileChange) -> String {
    let path = change.path.as_str();
    let scope = path.split_once('/').map_or(path, |(first, _)| first);
    let short_name = path.rsplit('/').next().unwrap_or(path);
    let category = Category::of(path);
    let mut bullet = format!(
        "- {} {} in {scope}: {short_name}",
        change.status.verb(),
        category.clause()
    );
    if change.lines_added > 0 || change.lines_deleted > 0 {
        bullet.push_str(&format!(" (+{} -{})", change.lines_added, change.lines_deleted));
    }
    bullet
}

/// Deterministic message from bullets alone. Never calls the network.
///
/// The commit type follows the majority category; ties go to tests, then
/// docs, then tooling, then code.
pub fn compose_local(bullets: &[String]) -> String {
    let mut counts: HashMap<Category, usize> = HashMap::new();
    for bullet in bullets {
        *counts.entry(Category::of_bullet(bullet)).or_default() += 1;
    }
    let mut majority = Category::Test;
    for category in [Category::Test, Category::Docs, Category::Chore, Category::Code] {
        let count = counts.get(&category).copied().unwrap_or(0);
        if count > counts.get(&majority).copied().unwrap_or(0) {
            majority = category;
        }
    }
    let (kind, title) = majority.local_title();

    let mut body: Vec<String> = bullets.iter().take(LOCAL_BODY_BULLETS).cloned().collect();
    if bullets.len() > LOCAL_BODY_BULLETS {
        body.push(format!("- and {} more changes", bullets.len() - LOCAL_BODY_BULLETS));
    }
    format!("{kind}: {title}\n\nSummary of changes\n{}", body.join("\n"))
}

/// Text of a composed message and whether the model wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composed {
    pub text: String,
    pub local: bool,
}

/// Turn bullets into a message with one hard-reserved model call.
///
/// An unaffordable reservation, a failed call or an empty response all
/// fall back to [`compose_local`].
pub async fn compose_from_bullets(
    backend: &dyn ModelBackend,
    ledger: &BudgetLedger,
    model: &str,
    temperature: f32,
    bullets: &[String],
) -> Composed {
    let capped = &bullets[..bullets.len().min(MAX_COMPOSE_BULLETS)];
    let request = InvokeRequest::new(model, heuristic_compose_prompt(&capped.join("\n")))
        .with_temperature(temperature)
        .with_max_output_tokens(FINAL_FROM_BULLETS_COMPLETION);

    match call_metered(backend, ledger, &request, ReservationMode::Hard).await {
        Ok(text) => {
            let text = strip_code_fences(&text);
            if !text.is_empty() {
                return Composed { text, local: false };
            }
            warn!("Model returned an empty message, composing locally");
        }
        Err(MeteredError::BudgetExceeded { needed, spent, ceiling }) => {
            debug!("Compose call needs {needed} tokens ({spent}/{ceiling} used)");
            warn!("Token budget too low to compose from bullets, composing locally");
        }
        Err(MeteredError::Invocation(e)) => {
            warn!("Failed to compose from bullets ({e}), composing locally");
        }
    }

    Composed {
        text: compose_local(bullets),
        local: true,
    }
}
