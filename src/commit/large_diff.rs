//! Batched summaries for diffs too large for per-file bullets.
//!
//! Batches are summarized under soft reservations: the ceiling is advisory
//! here and a run may end over budget, with a warning once it does.

use tracing::{debug, info, warn};

use super::message::strip_code_fences;
use super::prompt::{
    BATCH_SUMMARY_COMPLETION, CONDENSE_COMPLETION, FINAL_FROM_SUMMARIES_COMPLETION,
    batch_summary_prompt, condense_prompt, final_from_summaries_header,
};
use super::synth::{Strategy, Synthesis, Synthesizer, pool_map};
use crate::budget::ReservationMode;
use crate::diff::{batch_by_token_limit, chunk_path, split_by_file, truncate_to_token_limit};
use crate::llm::{MeteredError, call_metered, effective_input_limit};
use crate::tokens::count_tokens;

/// Headroom under the model window for the reduced summaries.
const SUMMARY_HEADROOM: usize = 500;

/// Condensing rounds before settling for a larger summary.
const MAX_REDUCTION_ROUNDS: usize = 5;

/// Smallest number of lines condensed in one call.
const MIN_CONDENSE_LINES: usize = 10;

/// Paths listed in a batch fallback bullet.
const FALLBACK_BATCH_PATHS: usize = 5;

/// Characters kept from a section the model returned nothing for.
const EMPTY_CONDENSE_KEEP_CHARS: usize = 200;

/// Lines kept from a section whose condense call failed.
const FAILED_CONDENSE_KEEP_LINES: usize = 3;

/// Floor for the summaries share of the final prompt.
const MIN_SUMMARY_TOKENS: usize = 500;

const LOCAL_SUMMARY_LINES: usize = 25;
const LOCAL_SUMMARY_CHARS: usize = 1_200;

const ELISION: &str = "\n\n[...]\n\n";

impl Synthesizer<'_> {
    /// Summarize the diff in token-bounded batches, condense the summaries
    /// until they fit the model, then write the message from them.
    pub(super) async fn split_and_summarize(&self, diff: &str) -> Synthesis {
        soft_ceiling_notice();
        let mut chunks = split_by_file(diff);
        if chunks.is_empty() {
            chunks.push(diff);
        }
        println!("  Split into {} file diffs", chunks.len());

        let limit = self.settings.batch_token_limit;
        let batches = batch_by_token_limit(&chunks, limit);
        println!("  Grouped into {} batches", batches.len());

        let summaries = pool_map(batches, self.settings.concurrency, |batch| {
            self.summarize_batch(batch)
        })
        .await;
        let combined = summaries.join("\n\n");
        println!(
            "  Generated {} batch summaries ({} tokens)",
            summaries.len(),
            count_tokens(&combined)
        );

        self.finish_from_summaries(&combined, Strategy::SplitAndSummarize).await
    }

    /// Condense summaries if needed, then run the final call over them.
    ///
    /// Every call here is soft-reserved, so the run may end over budget;
    /// that is reported before returning.
    pub(super) async fn finish_from_summaries(
        &self,
        summaries: &str,
        strategy: Strategy,
    ) -> Synthesis {
        let target = effective_input_limit(&self.settings.model).saturating_sub(SUMMARY_HEADROOM);
        let reduced = if count_tokens(summaries) > target {
            println!("  Summaries still too large, condensing...");
            self.reduce(summaries, target).await
        } else {
            summaries.to_string()
        };
        let text = self.final_from_summaries(&reduced).await;

        if self.ledger.is_over_budget() {
            eprintln!(
                "Warning: token usage ({}) exceeded the soft ceiling ({}).",
                self.ledger.spent(),
                self.ledger.ceiling()
            );
        }
        Synthesis::new(&text, strategy)
    }

    async fn summarize_batch(&self, batch: Vec<&str>) -> String {
        let limit = self.settings.batch_token_limit;
        let mut combined = batch.join("\n");
        if count_tokens(&combined) > limit {
            combined = truncate_to_token_limit(&combined, limit);
        }

        let request = self.request(batch_summary_prompt(&combined), BATCH_SUMMARY_COMPLETION);
        match call_metered(self.backend, self.ledger, &request, ReservationMode::Soft).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => "- Update files".to_string(),
            Err(e) => {
                warn!("Failed to summarize batch: {e}");
                batch_fallback(&batch)
            }
        }
    }

    /// Condense `text` in rounds until it fits `target` tokens.
    ///
    /// Stops after [`MAX_REDUCTION_ROUNDS`] or once a round no longer
    /// shrinks the text, returning the smallest version reached.
    async fn reduce(&self, text: &str, target: usize) -> String {
        let mut current = text.to_string();
        let mut tokens = count_tokens(&current);

        for round in 1..=MAX_REDUCTION_ROUNDS {
            if tokens <= target {
                break;
            }
            let sections = split_sections(&current);
            debug!("Reduction round {round}: {tokens} tokens in {} sections", sections.len());

            let condensed = pool_map(sections, self.settings.concurrency, |section| {
                self.condense(section)
            })
            .await
            .join("\n\n");

            let condensed_tokens = count_tokens(&condensed);
            if condensed_tokens >= tokens {
                info!("Reduction stalled at {tokens} tokens after {round} rounds");
                break;
            }
            current = condensed;
            tokens = condensed_tokens;
        }

        if tokens > target {
            warn!("Summaries remain {tokens} tokens, over the {target} target");
        }
        current
    }

    async fn condense(&self, section: String) -> String {
        let request = self.request(condense_prompt(&section), CONDENSE_COMPLETION);
        match call_metered(self.backend, self.ledger, &request, ReservationMode::Soft).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => head_chars(&section, EMPTY_CONDENSE_KEEP_CHARS).to_string(),
            Err(e) => {
                debug!("Condense call failed: {e}");
                section
                    .lines()
                    .take(FAILED_CONDENSE_KEEP_LINES)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    }

    /// One soft-reserved call over the summaries, cut at the middle if they
    /// still overflow the prompt. Never retried.
    async fn final_from_summaries(&self, summaries: &str) -> String {
        let header = final_from_summaries_header();
        let max_summary_tokens = effective_input_limit(&self.settings.model)
            .saturating_sub(count_tokens(&header))
            .saturating_sub(FINAL_FROM_SUMMARIES_COMPLETION as usize)
            .saturating_sub(SUMMARY_HEADROOM)
            .max(MIN_SUMMARY_TOKENS);

        let summaries = if count_tokens(summaries) > max_summary_tokens {
            elide_to_fit(summaries, max_summary_tokens)
        } else {
            summaries.to_string()
        };

        let request = self.request(format!("{header}{summaries}"), FINAL_FROM_SUMMARIES_COMPLETION);
        match call_metered(self.backend, self.ledger, &request, ReservationMode::Soft).await {
            Ok(text) => {
                let text = strip_code_fences(&text);
                if !text.is_empty() {
                    return text;
                }
                warn!("Model returned an empty message, composing from summaries");
            }
            Err(MeteredError::BudgetExceeded { .. }) => {
                warn!("Final call refused, composing from summaries");
            }
            Err(MeteredError::Invocation(e)) => {
                warn!("Failed to generate the final message ({e}), composing from summaries");
            }
        }
        compose_from_summaries(&summaries)
    }
}

pub(super) fn soft_ceiling_notice() {
    eprintln!(
        "Warning: the token budget is a soft ceiling while condensing summaries; usage may exceed it."
    );
}

/// Bullet naming a batch's files when its summary call failed.
fn batch_fallback(batch: &[&str]) -> String {
    let paths: Vec<&str> = batch.iter().filter_map(|chunk| chunk_path(chunk)).collect();
    if paths.is_empty() {
        return "- Update files".to_string();
    }
    let listed = paths[..paths.len().min(FALLBACK_BATCH_PATHS)].join(", ");
    let more = if paths.len() > FALLBACK_BATCH_PATHS { "..." } else { "" };
    format!("- Update {listed}{more}")
}

/// Split text into sections of about a quarter of its lines each.
fn split_sections(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.split('\n').collect();
    let size = MIN_CONDENSE_LINES.max(lines.len() / 4);
    lines
        .chunks(size)
        .map(|section| section.join("\n"))
        .filter(|section| !section.trim().is_empty())
        .collect()
}

/// Longest prefix of `text` with at most `max_chars` characters.
fn head_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Longest suffix of `text` with at most `max_chars` characters.
fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    match text.char_indices().nth(total.saturating_sub(max_chars)) {
        Some((idx, _)) if total > max_chars => &text[idx..],
        _ => text,
    }
}

/// Keep about `keep_chars` from each end, cut at line boundaries, and mark
/// the gap.
fn elide_middle(text: &str, keep_chars: usize) -> String {
    let head = head_chars(text, keep_chars);
    let head = head.rsplit_once('\n').map_or(head, |(kept, _)| kept);
    let tail = tail_chars(text, keep_chars);
    let tail = tail.split_once('\n').map_or(tail, |(_, kept)| kept);
    format!("{head}{ELISION}{tail}")
}

/// Elide the middle of `text` until it fits `max_tokens`.
///
/// Starts from about four characters per token and shrinks the kept ends
/// by a quarter per pass.
fn elide_to_fit(text: &str, max_tokens: usize) -> String {
    let mut keep = (max_tokens / 2) * 4;
    loop {
        let elided = elide_middle(text, keep);
        if keep == 0 || count_tokens(&elided) <= max_tokens {
            return elided;
        }
        keep = keep * 3 / 4;
    }
}

/// Deterministic message built from summary lines.
pub(super) fn compose_from_summaries(summaries: &str) -> String {
    let lines: Vec<&str> = summaries
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(LOCAL_SUMMARY_LINES)
        .collect();
    let mut body = lines.join("\n");
    if body.chars().count() > LOCAL_SUMMARY_CHARS {
        let cut = head_chars(&body, LOCAL_SUMMARY_CHARS - 3);
        let cut = cut.rsplit_once('\n').map_or(cut, |(kept, _)| kept);
        body = format!("{cut}\n...");
    }
    if body.is_empty() {
        return "chore: update multiple files\n\nVarious updates and improvements across the codebase."
            .to_string();
    }
    format!("chore: batch updates from summaries\n\n{body}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetLedger;
    use crate::commit::synth::SynthesisSettings;
    use crate::error::InvocationError;
    use crate::interact::NonInteractive;
    use crate::llm::backend::MockModelBackend;

    fn file_diff(path: &str, lines: usize) -> String {
        let mut chunk = format!("diff --git a/{path} b/{path}\n@@ -0,0 +1,{lines} @@\n");
        for i in 0..lines {
            chunk.push_str(&format!("+let value_{i} = compute_something({i});\n"));
        }
        chunk
    }

    #[test]
    fn batch_fallback_lists_five_paths() {
        let chunks: Vec<String> = (0..7).map(|i| file_diff(&format!("src/f{i}.rs"), 1)).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        assert_eq!(
            batch_fallback(&refs),
            "- Update src/f0.rs, src/f1.rs, src/f2.rs, src/f3.rs, src/f4.rs..."
        );
        assert_eq!(batch_fallback(&refs[..2]), "- Update src/f0.rs, src/f1.rs");
        assert_eq!(batch_fallback(&["+orphan line\n"]), "- Update files");
    }

    #[test]
    fn sections_hold_at_least_ten_lines() {
        let text: String = (0..12).map(|i| format!("- line {i}\n")).collect();
        let sections = split_sections(text.trim_end());
        assert_eq!(sections.len(), 2);
        assert!(sections[0].starts_with("- line 0"));
        assert_eq!(sections[1], "- line 10\n- line 11");

        let long: Vec<String> = (0..100).map(|i| format!("- line {i}")).collect();
        assert_eq!(split_sections(&long.join("\n")).len(), 4);
    }

    #[test]
    fn elide_middle_cuts_on_line_boundaries() {
        let text: String = (0..100).map(|i| format!("line {i:03}\n")).collect();
        let elided = elide_middle(&text, 40);
        let (head, tail) = elided.split_once(ELISION).unwrap();
        assert!(head.starts_with("line 000"));
        assert!(head.ends_with("line 003"));
        assert!(tail.starts_with("line 09"));
        assert!(tail.ends_with("line 099\n"));
    }

    #[test]
    fn elide_to_fit_recounts_dense_text() {
        // Symbols cost far more than one token per four characters.
        let text: String = (0..400).map(|i| format!("{i:03} ∮⊛⋈≋⨁⟁⧫ ⨂⟡⋔⊶⫷\n")).collect();
        let max_tokens = 200;
        assert!(count_tokens(&elide_middle(&text, (max_tokens / 2) * 4)) > max_tokens);

        let elided = elide_to_fit(&text, max_tokens);
        assert!(count_tokens(&elided) <= max_tokens);
        assert!(elided.contains(ELISION));
        assert!(elided.starts_with("000 "));
        assert!(elided.ends_with("399 ∮⊛⋈≋⨁⟁⧫ ⨂⟡⋔⊶⫷\n"));
    }

    #[test]
    fn char_helpers_respect_multibyte_text() {
        assert_eq!(head_chars("héllo", 2), "hé");
        assert_eq!(tail_chars("héllo", 4), "éllo");
        assert_eq!(head_chars("ab", 5), "ab");
        assert_eq!(tail_chars("ab", 5), "ab");
    }

    #[test]
    fn local_summary_composer() {
        let summaries = "\n- Add parser\n\n  - Fix lexer  \n";
        assert_eq!(
            compose_from_summaries(summaries),
            "chore: batch updates from summaries\n\n- Add parser\n- Fix lexer"
        );
        assert_eq!(
            compose_from_summaries(" \n"),
            "chore: update multiple files\n\nVarious updates and improvements across the codebase."
        );
    }

    #[test]
    fn local_summary_composer_caps_lines_and_chars() {
        let many: String = (0..40).map(|i| format!("- Update module {i}\n")).collect();
        let msg = compose_from_summaries(&many);
        assert_eq!(msg.lines().count(), 2 + LOCAL_SUMMARY_LINES);

        let wide: String = (0..25).map(|i| format!("- {i} {}\n", "x".repeat(80))).collect();
        let msg = compose_from_summaries(&wide);
        let body = msg.split_once("\n\n").unwrap().1;
        assert!(body.chars().count() <= LOCAL_SUMMARY_CHARS);
        assert!(body.ends_with("\n..."));
    }

    #[tokio::test]
    async fn split_path_summarizes_batches_then_finishes() {
        let mut mock = MockModelBackend::new();
        mock.expect_invoke()
            .withf(|req| req.max_output_tokens == BATCH_SUMMARY_COMPLETION)
            .times(2)
            .returning(|_| Ok("- Add values".to_string()));
        mock.expect_invoke()
            .withf(|req| {
                req.max_output_tokens == FINAL_FROM_SUMMARIES_COMPLETION
                    && req.prompt.contains("- Add values\n\n- Add values")
            })
            .times(1)
            .returning(|_| Ok("feat: add values".to_string()));

        let ledger = BudgetLedger::new(250_000);
        let mut settings = SynthesisSettings::new("gpt-4o-mini");
        settings.batch_token_limit = 300;
        let synth = Synthesizer::new(&mock, &ledger, &NonInteractive, settings);

        let diff = format!("{}{}", file_diff("src/a.rs", 20), file_diff("src/b.rs", 20));
        let result = synth.split_and_summarize(&diff).await;
        assert_eq!(result.strategy, Strategy::SplitAndSummarize);
        assert_eq!(result.message.title, "feat: add values");
    }

    #[tokio::test]
    async fn split_path_survives_total_model_failure() {
        let mut mock = MockModelBackend::new();
        mock.expect_invoke().returning(|_| {
            Err(InvocationError::Provider {
                model: "gpt-4o-mini".to_string(),
                status: 503,
                message: "unavailable".to_string(),
            })
        });

        let ledger = BudgetLedger::new(250_000);
        let mut settings = SynthesisSettings::new("gpt-4o-mini");
        settings.batch_token_limit = 300;
        let synth = Synthesizer::new(&mock, &ledger, &NonInteractive, settings);

        let diff = format!("{}{}", file_diff("src/a.rs", 20), file_diff("src/b.rs", 20));
        let result = synth.split_and_summarize(&diff).await;
        assert_eq!(
            result.message.format(),
            "chore: batch updates from summaries\n\n- Update src/a.rs\n- Update src/b.rs"
        );
        assert_eq!(ledger.spent(), 0);
    }

    #[tokio::test]
    async fn soft_reservations_may_exceed_the_ceiling() {
        let mut mock = MockModelBackend::new();
        mock.expect_invoke()
            .returning(|_| Ok("- Add values".to_string()));

        let ledger = BudgetLedger::new(10);
        let synth = Synthesizer::new(
            &mock,
            &ledger,
            &NonInteractive,
            SynthesisSettings::new("gpt-4o-mini"),
        );

        let result = synth.split_and_summarize(&file_diff("src/a.rs", 5)).await;
        assert_eq!(result.message.title, "- Add values");
        assert!(ledger.is_over_budget());
    }

    #[tokio::test]
    async fn reduce_stops_when_text_fits() {
        let mut mock = MockModelBackend::new();
        mock.expect_invoke()
            .withf(|req| req.max_output_tokens == CONDENSE_COMPLETION)
            .times(4)
            .returning(|_| Ok("- Condensed".to_string()));

        let ledger = BudgetLedger::new(250_000);
        let synth = Synthesizer::new(
            &mock,
            &ledger,
            &NonInteractive,
            SynthesisSettings::new("gpt-4o-mini"),
        );

        let text: Vec<String> = (0..100)
            .map(|i| format!("- Update the widget factory for case {i}"))
            .collect();
        let reduced = synth.reduce(&text.join("\n"), 50).await;
        assert_eq!(reduced, "- Condensed\n\n- Condensed\n\n- Condensed\n\n- Condensed");
    }

    #[tokio::test]
    async fn reduce_gives_up_when_nothing_shrinks() {
        let mut mock = MockModelBackend::new();
        mock.expect_invoke()
            .times(1)
            .returning(|req| {
                let section = req.prompt.rsplit("\n\n").next().unwrap_or_default();
                Ok(format!("{section}\n{section}"))
            });

        let ledger = BudgetLedger::new(250_000);
        let synth = Synthesizer::new(
            &mock,
            &ledger,
            &NonInteractive,
            SynthesisSettings::new("gpt-4o-mini"),
        );

        let text = "- Add a\n- Add b\n- Add c";
        assert_eq!(synth.reduce(text, 1).await, text);
    }
}
