//! Fitting a diff into a token limit at file boundaries.

use tracing::debug;

use super::split_by_file;
use crate::tokens::count_tokens;

/// A partial file is only worth including with at least this many tokens left.
const MIN_PARTIAL_TOKENS: usize = 100;

/// Used when the detailed notice alone does not fit the limit.
const SHORT_NOTICE: &str = "\n\n[... Diff truncated ...]";

/// Truncate `diff` to at most `limit` tokens.
///
/// Whole files are kept in order while they fit. If room remains, the next
/// file is cut by character count, preferring to end on a newline past the
/// halfway point. A notice stating files and tokens included is always
/// appended. Diffs already within the limit are returned unchanged.
///
/// The result stays within `limit` whenever `limit` can hold the short
/// truncation marker.
pub fn truncate_to_token_limit(diff: &str, limit: usize) -> String {
    let total_tokens = count_tokens(diff);
    if total_tokens <= limit {
        return diff.to_string();
    }

    let mut chunks = split_by_file(diff);
    if chunks.is_empty() {
        chunks.push(diff);
    }
    let total_files = chunks.len();

    // Size the notice with the widest numbers it can show.
    let notice_reserve = count_tokens(&notice(total_files, total_files, total_tokens, total_tokens));
    let body_limit = limit.saturating_sub(notice_reserve);

    let mut body = String::new();
    let mut included_files = 0;
    let mut included_tokens = 0;
    for chunk in &chunks {
        let tokens = count_tokens(chunk);
        if included_tokens + tokens > body_limit {
            let remaining = body_limit - included_tokens;
            if remaining > MIN_PARTIAL_TOKENS {
                let partial = cut_near_newline(chunk, remaining * 4);
                included_tokens += count_tokens(partial);
                body.push_str(partial);
            }
            break;
        }
        body.push_str(chunk);
        included_files += 1;
        included_tokens += tokens;
    }

    let notice_text = notice(included_files, total_files, included_tokens, total_tokens);
    let mut output = format!("{body}{notice_text}");
    while count_tokens(&output) > limit {
        if body.is_empty() {
            output = if count_tokens(&notice_text) <= limit {
                notice_text
            } else {
                SHORT_NOTICE.to_string()
            };
            break;
        }
        let shorter = cut_near_newline(&body, body.len() * 3 / 4).len();
        body.truncate(shorter);
        output = format!("{body}{notice_text}");
    }

    debug!(
        "Truncated diff to {included_files}/{total_files} files ({} tokens, limit {limit})",
        count_tokens(&output)
    );
    output
}

fn notice(included_files: usize, total_files: usize, included_tokens: usize, total_tokens: usize) -> String {
    format!(
        "\n\n[... Diff truncated: showing {included_files}/{total_files} files ({included_tokens}/{total_tokens} tokens) ...]"
    )
}

/// Prefix of `text` of at most `max_bytes` bytes, ending after a newline
/// when one exists past the halfway point.
fn cut_near_newline(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let prefix = &text[..end];
    match prefix.rfind('\n') {
        Some(newline) if newline > end / 2 => &prefix[..=newline],
        _ => prefix,
    }
}
