//! Dropping lockfile and binary-asset sections from a staged diff.

use super::{chunk_path, header_offsets};

/// File names and extensions whose diffs carry no message-worthy content.
pub const NOISE_PATTERNS: &[&str] = &[
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "Cargo.lock",
    "composer.lock",
    ".png",
    ".jpg",
    ".jpeg",
    ".gif",
    ".ico",
    ".pdf",
];

/// Remove every file section whose path matches one of `patterns`.
///
/// A pattern starting with `.` matches a file extension (case-insensitive);
/// any other pattern matches the file name exactly. Text before the first
/// header is kept as-is.
pub fn exclude_noise(diff: &str, patterns: &[&str]) -> String {
    let starts = header_offsets(diff);
    let Some(&first) = starts.first() else {
        return diff.to_string();
    };

    let mut kept = String::with_capacity(diff.len());
    kept.push_str(&diff[..first]);
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(diff.len());
        let chunk = &diff[start..end];
        let noisy = chunk_path(chunk).is_some_and(|path| is_noise(path, patterns));
        if !noisy {
            kept.push_str(chunk);
        }
    }
    kept
}

fn is_noise(path: &str, patterns: &[&str]) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let lower = file_name.to_ascii_lowercase();
    patterns.iter().any(|pattern| {
        if pattern.starts_with('.') {
            lower.ends_with(&pattern.to_ascii_lowercase())
        } else {
            file_name == *pattern
        }
    })
}
