//! Unified-diff segmentation.
//!
//! A staged diff is partitioned by its per-file `diff --git` headers. The
//! pieces are grouped into token-bounded batches for the summarization
//! passes, truncated at file boundaries when a single prompt must fit a
//! model's window, and filtered of lockfile and binary-asset noise.

mod filter;
mod truncate;

pub use filter::{NOISE_PATTERNS, exclude_noise};
pub use truncate::truncate_to_token_limit;

use crate::tokens::count_tokens;

/// The marker that opens every per-file section of a unified diff.
pub const FILE_HEADER: &str = "diff --git ";

/// Split a diff into per-file chunks.
///
/// Only headers at the start of a line count. Text before the first header
/// is discarded. Each chunk starts with its own header, so concatenating the
/// chunks reproduces the diff from the first header onward.
pub fn split_by_file(diff: &str) -> Vec<&str> {
    let starts = header_offsets(diff);
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(diff.len());
            &diff[start..end]
        })
        .collect()
}

/// Byte offsets of every line-initial file header.
fn header_offsets(diff: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    if diff.starts_with(FILE_HEADER) {
        offsets.push(0);
    }
    let needle = format!("\n{FILE_HEADER}");
    let mut from = 0;
    while let Some(found) = diff[from..].find(&needle) {
        let start = from + found + 1;
        offsets.push(start);
        from = start;
    }
    offsets
}

/// Group chunks greedily into batches of at most `max_tokens` tokens.
///
/// Order is preserved within and across batches. A chunk that alone exceeds
/// the limit becomes a singleton batch; it is never dropped.
pub fn batch_by_token_limit<'a>(chunks: &[&'a str], max_tokens: usize) -> Vec<Vec<&'a str>> {
    let mut batches = Vec::new();
    let mut current: Vec<&'a str> = Vec::new();
    let mut current_tokens = 0;

    for &chunk in chunks {
        let tokens = count_tokens(chunk);
        if tokens > max_tokens {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            batches.push(vec![chunk]);
        } else if current_tokens + tokens > max_tokens {
            batches.push(std::mem::replace(&mut current, vec![chunk]));
            current_tokens = tokens;
        } else {
            current.push(chunk);
            current_tokens += tokens;
        }
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Destination path named by a chunk's header, without the `b/` prefix.
///
/// Falls back to the `a/` side for headers that carry no `b/` path.
pub fn chunk_path(chunk: &str) -> Option<&str> {
    let header = chunk.lines().next()?.strip_prefix(FILE_HEADER)?;
    if let Some(idx) = header.rfind(" b/") {
        return Some(&header[idx + 3..]);
    }
    header
        .strip_prefix("a/")
        .map(|rest| rest.split(' ').next().unwrap_or(rest))
        .filter(|path| !path.is_empty())
}
