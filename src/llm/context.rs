//! Context window sizes per model.

/// Tokens held back from the window for the system prompt, prompt header
/// and the expected completion.
pub const RESERVED_TOKENS: usize = 2_000;

/// Window assumed when nothing else matches.
pub const DEFAULT_CONTEXT_WINDOW: usize = 8_000;

/// Known models in lookup order. More specific names come before names
/// they start with, since segment matching takes the first hit.
const MODEL_CONTEXT_LIMITS: &[(&str, usize)] = &[
    // OpenAI
    ("gpt-4.1", 1_047_576),
    ("gpt-5", 400_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("o1-mini", 128_000),
    ("o1-preview", 128_000),
    ("o1", 200_000),
    ("o3-mini", 200_000),
    // Anthropic
    ("claude-3-5-sonnet-20241022", 200_000),
    ("claude-3-5-haiku-20241022", 200_000),
    ("claude-3-opus-20240229", 200_000),
    ("claude-3-sonnet-20240229", 200_000),
    ("claude-3-haiku-20240307", 200_000),
    // Google
    ("gemini-2.5-pro", 1_000_000),
    ("gemini-2.5-flash", 1_000_000),
    ("gemini-2.0-flash", 1_000_000),
    ("gemini-1.5-pro", 1_000_000),
    ("gemini-1.5-flash", 1_000_000),
    ("gemini-3-flash-preview", 1_000_000),
    ("gemini-pro", 32_000),
    // Mistral
    ("mistral-large", 128_000),
    ("mistral-medium", 32_000),
    ("mistral-small", 32_000),
    ("codestral", 32_000),
    ("devstral", 128_000),
    // Others
    ("deepseek-chat", 64_000),
    ("deepseek-coder", 64_000),
    ("grok-2", 128_000),
    ("llama-3.1-405b", 128_000),
    ("llama-3.1-70b", 128_000),
    ("llama-3-70b", 8_192),
    ("llama-3-8b", 8_192),
    ("qwen-turbo", 8_000),
    ("qwen-plus", 32_000),
    ("qwen-max", 32_000),
];

/// Family fragments checked when no table entry matches.
const FAMILY_LIMITS: &[(&str, usize)] = &[
    ("gpt-4", 128_000),
    ("gpt-3", 16_385),
    ("claude", 200_000),
    ("gemini", 32_000),
    ("mistral", 32_000),
    ("deepseek", 64_000),
    ("grok", 128_000),
    ("llama", 8_192),
    ("qwen", 8_000),
];

/// Context window of `model` in tokens.
///
/// Tries an exact table match, then a case-insensitive segment match in
/// table order, then a family fragment, then [`DEFAULT_CONTEXT_WINDOW`].
/// A segment match needs the name at the start or after a separator, and
/// followed by the end or a separator, so `o1` never matches `foo1`.
pub fn context_window(model: &str) -> usize {
    if let Some(&(_, limit)) = MODEL_CONTEXT_LIMITS.iter().find(|(name, _)| *name == model) {
        return limit;
    }

    let lower = model.to_lowercase();
    MODEL_CONTEXT_LIMITS
        .iter()
        .chain(FAMILY_LIMITS)
        .find(|(name, _)| contains_segment(&lower, name))
        .map_or(DEFAULT_CONTEXT_WINDOW, |&(_, limit)| limit)
}

fn contains_segment(name: &str, key: &str) -> bool {
    name.match_indices(key).any(|(start, _)| {
        let before = name[..start].chars().next_back();
        let after = name[start + key.len()..].chars().next();
        before.is_none_or(is_separator) && after.is_none_or(is_separator)
    })
}

fn is_separator(c: char) -> bool {
    matches!(c, '-' | '_' | '.' | '/' | ':' | '@' | ' ')
}

/// Tokens of input a single prompt to `model` may carry.
pub fn effective_input_limit(model: &str) -> usize {
    context_window(model).saturating_sub(RESERVED_TOKENS)
}
