//! autocommit - CLI entry point.

use std::io::IsTerminal;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use autocommit::commit::{LargeDiffPolicy, StagedChanges, SynthesisSettings, Synthesizer};
use autocommit::config::Config;
use autocommit::error::CommitError;
use autocommit::git::{GitRepo, IndexBackup, check_safe_state, missing_files};
use autocommit::interact::{NonInteractive, Prompter, TerminalPrompter};
use autocommit::llm::resolve_backend;
use autocommit::BudgetLedger;

/// Write a conventional commit message for the staged changes, then commit and push.
#[derive(Parser, Debug)]
#[command(name = "autocommit")]
#[command(about = "Write a commit message for staged changes with an LLM, then commit and push")]
#[command(version)]
struct Cli {
    /// Model to use (defaults to the configured model)
    #[arg(short, long)]
    model: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Remote to push to (defaults to the configured remote)
    #[arg(long)]
    remote: Option<String>,

    /// How to handle a diff too large for one prompt
    #[arg(long, value_enum, default_value_t = LargeDiffArg::Auto)]
    large_diff: LargeDiffArg,

    /// Skip file-status heuristics and summarize the diff itself
    #[arg(long)]
    diff_only: bool,

    /// Abort instead of composing locally when the budget runs out
    #[arg(long)]
    strict_budget: bool,

    /// Print the message without committing
    #[arg(long)]
    dry_run: bool,

    /// Commit without pushing
    #[arg(long)]
    no_push: bool,

    /// Never prompt; accept defaults
    #[arg(short = 'y', long)]
    yes: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Save the default model and exit
    #[arg(long, value_name = "MODEL")]
    set_default_model: Option<String>,

    /// Save the per-run token budget and exit
    #[arg(long, value_name = "TOKENS", allow_negative_numbers = true)]
    set_token_budget: Option<i64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LargeDiffArg {
    /// Per-file summaries, sampled to fit the budget
    Auto,
    /// Ask each time
    Ask,
    /// Batched summaries, condensed until they fit
    Split,
    /// Cut the diff to fit one prompt
    Truncate,
}

impl From<LargeDiffArg> for LargeDiffPolicy {
    fn from(arg: LargeDiffArg) -> Self {
        match arg {
            LargeDiffArg::Auto => LargeDiffPolicy::Auto,
            LargeDiffArg::Ask => LargeDiffPolicy::Ask,
            LargeDiffArg::Split => LargeDiffPolicy::Split,
            LargeDiffArg::Truncate => LargeDiffPolicy::Truncate,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load();

    // Step 1: Settings-only invocations
    if cli.set_default_model.is_some() || cli.set_token_budget.is_some() {
        return save_settings(&cli, &mut config);
    }

    // Step 2: Open the repository and check it is safe to commit in
    let cwd = std::env::current_dir().context("Could not read the current directory")?;
    let repo = GitRepo::discover(&cwd)
        .context("Not a git repository. Run autocommit from within a git repository.")?;
    println!("Operating on repository: {}", repo.workdir().display());
    check_safe_state(&repo)?;

    let remote = cli.remote.clone().unwrap_or_else(|| config.remote.clone());
    let has_changes = repo.has_changes().context("Failed to read repository status")?;
    let has_unpushed = repo.has_unpushed_commits(&remote);

    if !has_changes && !has_unpushed {
        println!("Repository is clean and up to date. Nothing to commit or push.");
        return Ok(());
    }
    if !has_changes {
        if cli.no_push || cli.dry_run {
            println!("Found unpushed commits; not pushing.");
            return Ok(());
        }
        println!("Found unpushed commits. Pushing to {remote}...");
        let branch = repo.current_branch()?;
        repo.push(&remote, branch.as_deref()).context("Failed to push")?;
        println!("✓ Pushed existing commits");
        return Ok(());
    }

    // Step 3: Collect the staged changes
    let original_status = repo.status_entries().context("Failed to read repository status")?;
    let staged = repo.staged_files().context("Failed to list staged files")?;
    if staged.is_empty() {
        return Err(CommitError::NoStagedChanges.into());
    }
    println!("Found {} staged file(s):", staged.len());
    for path in &staged {
        println!("  - {path}");
    }

    let backup = match IndexBackup::create(&repo) {
        Ok(backup) => backup,
        Err(e) => {
            warn!("Continuing without an index backup: {e}");
            None
        }
    };

    let changes = collect_changes(&repo, cli.diff_only)?;

    // Step 4: Synthesize the message within the budget
    let model = cli.model.clone().unwrap_or_else(|| config.default_model.clone());
    let ledger = BudgetLedger::new(config.token_budget_ceiling());
    let backend = resolve_backend(&model, config.timeout())
        .with_context(|| format!("Cannot use model '{model}'"))?;

    let interactive = !cli.yes && std::io::stdin().is_terminal();
    let prompter: Box<dyn Prompter> = if interactive {
        Box::new(TerminalPrompter)
    } else {
        Box::new(NonInteractive)
    };

    let mut settings = SynthesisSettings::new(&model);
    settings.temperature = cli.temperature.unwrap_or(config.temperature);
    settings.large_diff = cli.large_diff.into();
    settings.heuristic_first = !cli.diff_only;
    settings.strict_budget = cli.strict_budget;

    println!("Generating commit message with {model}...");
    let synthesis = Synthesizer::new(backend.as_ref(), &ledger, prompter.as_ref(), settings)
        .synthesize(&changes)
        .await?;
    println!(
        "Final token usage: {}/{} tokens",
        ledger.spent(),
        ledger.ceiling()
    );

    // Step 5: Review
    let mut message = synthesis.message;
    println!("\n--- Commit message ({}) ---\n", synthesis.strategy);
    println!("{message}\n");
    for issue in message.title_issues() {
        eprintln!("Warning: {issue}");
    }
    if prompter.is_interactive()
        && let Some(comment) = prompter.commit_comment()
    {
        message = message.with_comment(&comment);
        println!("\n{message}\n");
    }

    if cli.dry_run {
        println!("Dry run: nothing committed.");
        return Ok(());
    }
    if !prompter.confirm_commit() {
        println!("Commit cancelled.");
        return Ok(());
    }

    // Step 6: Commit, push, verify
    if let Err(e) = repo.commit(&message.format()) {
        if let Some(backup) = &backup
            && let Err(restore_err) = backup.restore()
        {
            warn!("Could not restore the index backup: {restore_err}");
        }
        return Err(e).context("Failed to commit");
    }
    println!("✓ Committed");

    if !cli.no_push {
        let branch = repo.current_branch()?;
        repo.push(&remote, branch.as_deref())
            .with_context(|| format!("Commit created but push to {remote} failed"))?;
        println!("✓ Pushed to {remote}");
    }

    let after = repo.status_entries().context("Failed to read repository status")?;
    let missing = missing_files(&original_status, &after, &staged);
    if missing.is_empty() {
        println!("✓ No files were lost");
    } else {
        eprintln!("Warning: {} file(s) appear to be missing:", missing.len());
        for path in &missing {
            eprintln!("  - {path}");
        }
    }

    drop(backup);
    Ok(())
}

/// `RUST_LOG` wins; otherwise `--verbose` selects debug.
fn init_tracing(verbose: bool) {
    let default = if verbose { "autocommit=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn save_settings(cli: &Cli, config: &mut Config) -> Result<()> {
    if let Some(model) = &cli.set_default_model {
        config.default_model = model.trim().to_string();
    }
    if let Some(budget) = cli.set_token_budget {
        config.set_token_budget(budget)?;
    }
    let path = Config::default_path()?;
    config
        .save_to(&path)
        .with_context(|| format!("Failed to save {}", path.display()))?;
    println!("✓ Saved settings to {}", path.display());
    println!("  default model: {}", config.default_model);
    println!("  token budget:  {}", config.token_budget);
    Ok(())
}

/// Read name-status, numstat and the filtered diff from the index.
fn collect_changes(repo: &GitRepo, diff_only: bool) -> Result<StagedChanges> {
    let (name_status, numstat) = if diff_only {
        (None, None)
    } else {
        (read_optional(repo.name_status()), read_optional(repo.numstat()))
    };

    let diff = repo.cached_diff().context("Failed to read the staged diff")?;
    if diff.trim().is_empty() {
        return Err(CommitError::NoChanges.into());
    }
    println!(
        "Diff size: {} characters ({} tokens)",
        diff.len(),
        autocommit::tokens::count_tokens(&diff)
    );

    Ok(StagedChanges {
        name_status,
        numstat,
        diff,
    })
}

fn read_optional(result: Result<String, autocommit::GitError>) -> Option<String> {
    match result {
        Ok(output) => Some(output),
        Err(e) => {
            warn!("Skipping file status heuristics: {e}");
            None
        }
    }
}
