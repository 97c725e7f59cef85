//! Token estimation shared by every budgeting decision.
//!
//! Counts are a budgeting heuristic, not a billing figure: the o200k
//! tokenizer is applied line by line so very long single-line pieces
//! (minified assets, lockfile hashes) never hit BPE's quadratic worst case.

use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Lines longer than this are estimated by byte length instead of encoded.
const MAX_ENCODED_LINE_BYTES: usize = 4096;

/// Average bytes per token used when a line is not encoded.
const BYTES_PER_TOKEN: usize = 4;

static ENCODER: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match tiktoken_rs::o200k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        warn!("Failed to load o200k tokenizer, estimating by length: {e}");
        None
    }
});

/// Count tokens in `text`.
///
/// Deterministic and linear in the input length. Counting is additive over
/// newline-terminated pieces: `count_tokens(a + b) == count_tokens(a) +
/// count_tokens(b)` whenever `a` ends with `'\n'`.
pub fn count_tokens(text: &str) -> usize {
    text.split_inclusive('\n').map(count_line).sum()
}

fn count_line(line: &str) -> usize {
    match ENCODER.as_ref() {
        Some(bpe) if line.len() <= MAX_ENCODED_LINE_BYTES => bpe.encode_ordinary(line).len(),
        _ => line.len().div_ceil(BYTES_PER_TOKEN),
    }
}
