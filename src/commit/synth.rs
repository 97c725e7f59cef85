//! Commit message synthesis under a token budget.
//!
//! Strategies are tried from cheapest to most expensive:
//!
//! 1. Heuristic bullets from name-status/numstat, composed in one small call.
//! 2. A single prompt over the whole diff when it fits the model and budget.
//! 3. For larger diffs, one bullet per file (all files, or the largest
//!    affordable sample) and a final call over the sorted bullets.
//! 4. Batched summaries, recursively condensed, then a final call. This is
//!    chosen explicitly for oversized diffs or used when the bullets alone
//!    overflow the model window.
//!
//! Every exit produces a message. Model failures degrade to a locally
//! composed message; only a cancelled run or a strict-budget overrun fails.

use std::fmt;
use std::future::Future;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::heuristic::{build_bullets, compose_from_bullets, parse_file_changes};
use super::large_diff::{compose_from_summaries, soft_ceiling_notice};
use super::message::{CommitMessage, strip_code_fences};
use super::prompt::{
    FILE_BULLET_COMPLETION, FINAL_FROM_BULLETS_COMPLETION, PROMPT_HEADER, SINGLE_SHOT_COMPLETION,
    file_bullet_prompt, final_from_bullets_prompt, sanitize_diff, single_shot_prompt,
};
use crate::budget::{BudgetLedger, ReservationMode};
use crate::diff::{chunk_path, split_by_file, truncate_to_token_limit};
use crate::error::CommitError;
use crate::interact::{LargeDiffChoice, Prompter};
use crate::llm::retry::is_reachable;
use crate::llm::{
    InvokeRequest, MeteredError, ModelBackend, RetryError, RetryPolicy, call_metered,
    effective_input_limit, retry_with_backoff,
};
use crate::tokens::count_tokens;

/// Extra prompt tokens allowed for beyond the header when sizing a diff.
const PROMPT_OVERHEAD_BUFFER: usize = 100;

/// Budget kept in hand when deciding whether a diff fits the run.
const BUDGET_SAFETY_MARGIN: usize = 500;

/// Chunks sampled to estimate the per-file summarization cost.
const CAPACITY_SAMPLE: usize = 10;

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_BATCH_TOKEN_LIMIT: usize = 4_000;

/// Inputs read from the index before synthesis.
#[derive(Debug, Clone, Default)]
pub struct StagedChanges {
    /// `git diff --cached --name-status`.
    pub name_status: Option<String>,
    /// `git diff --cached --numstat`.
    pub numstat: Option<String>,
    /// Filtered `git diff --cached` output.
    pub diff: String,
}

/// The path that produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Heuristic,
    HeuristicLocal,
    SingleShot,
    Truncated,
    Hierarchical,
    Sampled,
    SplitAndSummarize,
    Fallback,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Heuristic => "heuristic",
            Strategy::HeuristicLocal => "heuristic (local)",
            Strategy::SingleShot => "single prompt",
            Strategy::Truncated => "truncated diff",
            Strategy::Hierarchical => "per-file summaries",
            Strategy::Sampled => "sampled per-file summaries",
            Strategy::SplitAndSummarize => "split and summarize",
            Strategy::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a synthesis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub message: CommitMessage,
    pub strategy: Strategy,
}

impl Synthesis {
    pub(super) fn new(text: &str, strategy: Strategy) -> Self {
        Self {
            message: CommitMessage::parse_or_fallback(text),
            strategy,
        }
    }
}

/// What to do when the diff does not fit one prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LargeDiffPolicy {
    /// Per-file summaries, sampled when the budget cannot cover every file.
    #[default]
    Auto,
    /// Ask the prompter.
    Ask,
    /// Batch summaries with recursive condensing.
    Split,
    /// Cut the diff to fit and send it in one prompt.
    Truncate,
}

/// Knobs for one synthesis run.
#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub model: String,
    pub temperature: f32,
    /// Width of the summarization worker pool.
    pub concurrency: usize,
    pub large_diff: LargeDiffPolicy,
    /// Try heuristic bullets before reading the diff.
    pub heuristic_first: bool,
    /// Abort instead of composing locally when the final call is unaffordable.
    pub strict_budget: bool,
    /// Token ceiling for one batch in the split path.
    pub batch_token_limit: usize,
    pub retry: RetryPolicy,
}

impl SynthesisSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.2,
            concurrency: DEFAULT_CONCURRENCY,
            large_diff: LargeDiffPolicy::Auto,
            heuristic_first: true,
            strict_budget: false,
            batch_token_limit: DEFAULT_BATCH_TOKEN_LIMIT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Drives one run of the pipeline against a backend and a ledger.
pub struct Synthesizer<'a> {
    pub(super) backend: &'a dyn ModelBackend,
    pub(super) ledger: &'a BudgetLedger,
    pub(super) prompter: &'a dyn Prompter,
    pub(super) settings: SynthesisSettings,
}

impl<'a> Synthesizer<'a> {
    pub fn new(
        backend: &'a dyn ModelBackend,
        ledger: &'a BudgetLedger,
        prompter: &'a dyn Prompter,
        settings: SynthesisSettings,
    ) -> Self {
        Self {
            backend,
            ledger,
            prompter,
            settings,
        }
    }

    /// Produce a commit message for the staged changes.
    pub async fn synthesize(&self, changes: &StagedChanges) -> Result<Synthesis, CommitError> {
        if self.settings.heuristic_first
            && let Some(synthesis) = self.try_heuristic(changes).await
        {
            return Ok(synthesis);
        }

        let diff = sanitize_diff(&changes.diff);
        if diff.trim().is_empty() {
            return Err(CommitError::NoChanges);
        }

        let diff_tokens = count_tokens(&diff);
        let limit = self.single_prompt_limit();
        debug!("Diff is {diff_tokens} tokens, single prompt limit {limit}");
        if diff_tokens <= limit {
            return Ok(self.single_shot(&diff, Strategy::SingleShot).await);
        }

        println!("Diff size: {diff_tokens} tokens (limit: {limit} tokens)");
        let choice = match self.settings.large_diff {
            LargeDiffPolicy::Auto => None,
            LargeDiffPolicy::Split => Some(LargeDiffChoice::Split),
            LargeDiffPolicy::Truncate => Some(LargeDiffChoice::Truncate),
            LargeDiffPolicy::Ask => Some(self.prompter.large_diff_strategy(diff_tokens, limit)),
        };

        match choice {
            None => self.summarize_files(&diff).await,
            Some(LargeDiffChoice::Split) => Ok(self.split_and_summarize(&diff).await),
            Some(LargeDiffChoice::Truncate) => Ok(self.truncated(&diff, limit).await),
            Some(LargeDiffChoice::Cancel) => Err(CommitError::Cancelled),
        }
    }

    /// Heuristic bullets, if name-status parses into at least one change.
    async fn try_heuristic(&self, changes: &StagedChanges) -> Option<Synthesis> {
        let name_status = changes.name_status.as_deref()?;
        let files = match parse_file_changes(name_status, changes.numstat.as_deref()) {
            Ok(files) if !files.is_empty() => files,
            Ok(_) => return None,
            Err(e) => {
                info!("Skipping heuristic summary: {e}");
                return None;
            }
        };

        let bullets = build_bullets(&files);
        println!("Composing from {} file summaries (no diff sent)", bullets.len());
        let composed = compose_from_bullets(
            self.backend,
            self.ledger,
            &self.settings.model,
            self.settings.temperature,
            &bullets,
        )
        .await;
        let strategy = if composed.local {
            Strategy::HeuristicLocal
        } else {
            Strategy::Heuristic
        };
        Some(Synthesis::new(&composed.text, strategy))
    }

    /// Largest diff that fits one prompt for this model and this run's budget.
    fn single_prompt_limit(&self) -> usize {
        let overhead = count_tokens(PROMPT_HEADER) + PROMPT_OVERHEAD_BUFFER;
        let model_limit = effective_input_limit(&self.settings.model).saturating_sub(overhead);
        let budget_limit = self.ledger.remaining().saturating_sub(BUDGET_SAFETY_MARGIN);
        model_limit.min(budget_limit)
    }

    pub(super) fn request(&self, prompt: String, max_output_tokens: u32) -> InvokeRequest {
        InvokeRequest::new(&self.settings.model, prompt)
            .with_temperature(self.settings.temperature)
            .with_max_output_tokens(max_output_tokens)
    }

    /// One hard-reserved call, retried with backoff on transient failures.
    ///
    /// Each attempt reserves and refunds on its own.
    async fn call_with_retry(
        &self,
        request: &InvokeRequest,
    ) -> Result<String, RetryError<MeteredError>> {
        let result = retry_with_backoff(
            &self.settings.retry,
            || call_metered(self.backend, self.ledger, request, ReservationMode::Hard),
            MeteredError::is_retryable,
        )
        .await;

        if let Err(RetryError::Exhausted { attempts, last }) = &result {
            warn!("All {attempts} attempts failed, last error: {last}");
            self.diagnose_network().await;
        }
        result
    }

    /// Tell the user whether the endpoint is reachable at all.
    async fn diagnose_network(&self) {
        let Some(host) = self.backend.endpoint_host() else {
            return;
        };
        if is_reachable(&host).await {
            eprintln!("  {host} is reachable; the model service may be overloaded.");
        } else {
            eprintln!("  Cannot connect to {host}. Check your network connection.");
        }
    }

    async fn single_shot(&self, diff: &str, strategy: Strategy) -> Synthesis {
        let request = self.request(single_shot_prompt(diff), SINGLE_SHOT_COMPLETION);
        match self.call_with_retry(&request).await {
            Ok(text) => {
                let text = strip_code_fences(&text);
                if !text.is_empty() {
                    return Synthesis::new(&text, strategy);
                }
                warn!("Model returned an empty message");
            }
            Err(RetryError::NotRetryable(MeteredError::BudgetExceeded { spent, ceiling, .. })) => {
                warn!("Token budget too low for the diff ({spent}/{ceiling} used)");
            }
            Err(e) => warn!("Commit message generation failed: {}", e.into_inner()),
        }
        self.fallback()
    }

    /// A user-provided message when interactive, the generic one otherwise.
    fn fallback(&self) -> Synthesis {
        eprintln!("Using a fallback commit message.");
        let message = self
            .prompter
            .fallback_message()
            .and_then(|text| CommitMessage::parse(&text))
            .unwrap_or_else(CommitMessage::fallback);
        Synthesis {
            message,
            strategy: Strategy::Fallback,
        }
    }

    async fn truncated(&self, diff: &str, limit: usize) -> Synthesis {
        let truncated = truncate_to_token_limit(diff, limit);
        println!("Truncated diff to {} tokens", count_tokens(&truncated));
        self.single_shot(&truncated, Strategy::Truncated).await
    }

    /// Per-file bullets for every file, or for the largest affordable ones.
    async fn summarize_files(&self, diff: &str) -> Result<Synthesis, CommitError> {
        let chunks = split_by_file(diff);
        if chunks.is_empty() {
            warn!("Diff has no per-file sections, truncating instead");
            return Ok(self.truncated(diff, self.single_prompt_limit()).await);
        }
        println!("Summarising {} file diffs...", chunks.len());

        let affordable = self.affordable_files(&chunks);
        let (mut bullets, strategy) = if chunks.len() <= affordable {
            (self.file_bullets(&chunks).await, Strategy::Hierarchical)
        } else {
            println!(
                "  Too many files for the budget, summarising the {affordable} largest"
            );
            let mut ranked: Vec<&str> = chunks.clone();
            ranked.sort_by_key(|chunk| std::cmp::Reverse(chunk.len()));
            ranked.truncate(affordable);
            let mut bullets = self.file_bullets(&ranked).await;
            bullets.push(format!(
                "- Update {} additional files",
                chunks.len() - ranked.len()
            ));
            (bullets, Strategy::Sampled)
        };
        bullets.sort();
        let bullets_text = bullets.join("\n");

        let request = self.request(
            final_from_bullets_prompt(&bullets_text, strategy == Strategy::Sampled),
            FINAL_FROM_BULLETS_COMPLETION,
        );
        if request.prompt_tokens() > effective_input_limit(&self.settings.model) {
            warn!("File summaries overflow the model window, condensing them");
            soft_ceiling_notice();
            return Ok(self.finish_from_summaries(&bullets_text, strategy).await);
        }

        match self.call_with_retry(&request).await {
            Ok(text) => {
                let text = strip_code_fences(&text);
                if !text.is_empty() {
                    return Ok(Synthesis::new(&text, strategy));
                }
                warn!("Model returned an empty message, composing from summaries");
            }
            Err(RetryError::NotRetryable(MeteredError::BudgetExceeded { .. }))
                if self.settings.strict_budget =>
            {
                return Err(CommitError::BudgetExceeded {
                    spent: self.ledger.spent(),
                    ceiling: self.ledger.ceiling(),
                });
            }
            Err(RetryError::NotRetryable(MeteredError::BudgetExceeded { spent, ceiling, .. })) => {
                warn!("Token budget exhausted before the final call ({spent}/{ceiling} used), composing from summaries");
            }
            Err(e) => warn!("Final commit message call failed ({}), composing from summaries", e.into_inner()),
        }
        Ok(Synthesis::new(&compose_from_summaries(&bullets_text), strategy))
    }

    /// How many per-file summaries the ceiling can pay for, keeping a tenth
    /// of it for the final call.
    fn affordable_files(&self, chunks: &[&str]) -> usize {
        let sample = &chunks[..chunks.len().min(CAPACITY_SAMPLE)];
        let sample_cost: usize = sample
            .iter()
            .map(|chunk| count_tokens(&file_bullet_prompt(chunk)) + FILE_BULLET_COMPLETION as usize)
            .sum();
        let average = (sample_cost / sample.len().max(1)).max(1);
        let ceiling = self.ledger.ceiling();
        let affordable = (ceiling - ceiling / 10) / average;
        println!("  ~{average} tokens per file, budget covers ~{affordable} files");
        affordable
    }

    /// One bullet per chunk, in chunk order.
    ///
    /// Chunks the budget cannot cover get a local bullet, reported once.
    async fn file_bullets(&self, chunks: &[&str]) -> Vec<String> {
        let bullets = pool_map(chunks.to_vec(), self.settings.concurrency, |chunk| async move {
            self.file_bullet(chunk).await.ok_or(chunk)
        })
        .await;

        let unaffordable = bullets.iter().filter(|bullet| bullet.is_err()).count();
        if unaffordable > 0 {
            warn!(
                "Token budget exhausted: {unaffordable} of {} files use a local bullet instead of a summary",
                chunks.len()
            );
        }
        bullets
            .into_iter()
            .map(|bullet| bullet.unwrap_or_else(local_bullet))
            .collect()
    }

    /// `None` when the budget refused the call.
    async fn file_bullet(&self, chunk: &str) -> Option<String> {
        let request = self.request(file_bullet_prompt(chunk), FILE_BULLET_COMPLETION);
        match call_metered(self.backend, self.ledger, &request, ReservationMode::Hard).await {
            Ok(text) => {
                let text = text.trim().trim_start_matches(['-', '•', ' ']);
                if !text.is_empty() {
                    return Some(format!("- {text}"));
                }
            }
            Err(MeteredError::BudgetExceeded { .. }) => {
                debug!("No budget left for {:?}", chunk_path(chunk));
                return None;
            }
            Err(MeteredError::Invocation(e)) => {
                warn!("Failed to summarize {}: {e}", chunk_path(chunk).unwrap_or("file"));
            }
        }
        Some(local_bullet(chunk))
    }
}

/// Bullet naming a chunk's file, used when no model summary is available.
pub(super) fn local_bullet(chunk: &str) -> String {
    match chunk_path(chunk) {
        Some(path) => format!("- Update {path}"),
        None => "- Update file".to_string(),
    }
}

/// Run `f` over `items` with at most `width` futures in flight.
///
/// Results come back in input order regardless of completion order.
pub(super) async fn pool_map<T, R, F, Fut>(items: Vec<T>, width: usize, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let mut results: Vec<(usize, R)> = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let fut = f(item);
            async move { (index, fut.await) }
        })
        .buffer_unordered(width.max(1))
        .collect()
        .await;
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}
