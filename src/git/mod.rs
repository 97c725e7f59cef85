//! Repository access: state via git2, diffs and writes via the `git` binary.
//!
//! Commit and push shell out so the user's git config, hooks, SSH agent and
//! credential helpers all apply.

pub mod safety;

use std::path::{Path, PathBuf};
use std::process::Command;

use git2::{Repository, RepositoryState, Status, StatusOptions};
use tracing::debug;

use crate::diff::{NOISE_PATTERNS, exclude_noise};
use crate::error::GitError;

pub use safety::{IndexBackup, check_safe_state, missing_files};

const STAGED: Status = Status::INDEX_NEW
    .union(Status::INDEX_MODIFIED)
    .union(Status::INDEX_DELETED)
    .union(Status::INDEX_RENAMED)
    .union(Status::INDEX_TYPECHANGE);

/// One path from the repository status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    /// Deleted in the index or the working tree.
    pub deleted: bool,
}

/// A non-bare repository and its working directory.
pub struct GitRepo {
    repo: Repository,
    workdir: PathBuf,
}

impl GitRepo {
    /// Find the repository containing `path`, searching upward.
    pub fn discover(path: &Path) -> Result<Self, GitError> {
        let repo = Repository::discover(path).map_err(|source| GitError::NotARepository {
            path: path.display().to_string(),
            source,
        })?;
        let workdir = repo
            .workdir()
            .ok_or(GitError::BareRepository)?
            .to_path_buf();
        debug!(workdir = %workdir.display(), "Discovered repository");
        Ok(Self { repo, workdir })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// The `.git` directory.
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    pub fn state(&self) -> RepositoryState {
        self.repo.state()
    }

    pub fn is_head_detached(&self) -> Result<bool, GitError> {
        self.repo.head_detached().map_err(GitError::State)
    }

    /// Paths with staged changes, in status order.
    pub fn staged_files(&self) -> Result<Vec<String>, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).renames_head_to_index(true);
        let statuses = self.repo.statuses(Some(&mut opts)).map_err(GitError::State)?;
        Ok(statuses
            .iter()
            .filter(|entry| entry.status().intersects(STAGED))
            .filter_map(|entry| {
                entry
                    .head_to_index()
                    .and_then(|delta| delta.new_file().path().or(delta.old_file().path()))
                    .map(|p| p.to_string_lossy().into_owned())
                    .or_else(|| entry.path().map(str::to_string))
            })
            .collect())
    }

    /// Whether anything is staged, modified or untracked.
    pub fn has_changes(&self) -> Result<bool, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts)).map_err(GitError::State)?;
        Ok(!statuses.is_empty())
    }

    /// Current branch name; `None` on a detached HEAD.
    ///
    /// Works on an unborn branch, where HEAD names a branch with no commits.
    pub fn current_branch(&self) -> Result<Option<String>, GitError> {
        if self.is_head_detached()? {
            return Ok(None);
        }
        let head = self.repo.find_reference("HEAD").map_err(GitError::State)?;
        Ok(head
            .symbolic_target()
            .map(|target| target.strip_prefix("refs/heads/").unwrap_or(target).to_string()))
    }

    /// Whether HEAD has commits that `<remote>/<branch>` lacks.
    ///
    /// A missing remote-tracking branch counts as nothing to push.
    pub fn has_unpushed_commits(&self, remote: &str) -> bool {
        let Ok(Some(branch)) = self.current_branch() else {
            return false;
        };
        let Some(local) = self.repo.head().ok().and_then(|head| head.target()) else {
            return false;
        };
        let upstream_ref = format!("refs/remotes/{remote}/{branch}");
        let Ok(upstream) = self.repo.refname_to_id(&upstream_ref) else {
            debug!("No remote-tracking branch {upstream_ref}");
            return false;
        };
        match self.repo.graph_ahead_behind(local, upstream) {
            Ok((ahead, _)) => ahead > 0,
            Err(e) => {
                debug!("Could not compare HEAD with {upstream_ref}: {e}");
                false
            }
        }
    }

    /// `git diff --cached --name-status`.
    pub fn name_status(&self) -> Result<String, GitError> {
        self.run_git(&["diff", "--cached", "--name-status"], "diff --name-status")
    }

    /// `git diff --cached --numstat`.
    pub fn numstat(&self) -> Result<String, GitError> {
        self.run_git(&["diff", "--cached", "--numstat"], "diff --numstat")
    }

    /// Staged diff with minimal context, lockfiles and binary assets removed.
    pub fn cached_diff(&self) -> Result<String, GitError> {
        let raw = match self.run_git(&["diff", "--cached", "-U0", "--", "."], "diff --cached") {
            Ok(diff) => diff,
            Err(e) => {
                debug!("Minimal-context diff failed ({e}), retrying with defaults");
                self.run_git(&["diff", "--cached"], "diff --cached")?
            }
        };
        Ok(exclude_noise(raw.trim(), NOISE_PATTERNS))
    }

    /// Every changed or untracked path, read through git2 so names with
    /// spaces or non-ASCII characters come back unquoted.
    pub fn status_entries(&self) -> Result<Vec<StatusEntry>, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false)
            .renames_head_to_index(true);
        let statuses = self.repo.statuses(Some(&mut opts)).map_err(GitError::State)?;
        Ok(statuses
            .iter()
            .filter_map(|entry| {
                let path = entry
                    .head_to_index()
                    .or_else(|| entry.index_to_workdir())
                    .and_then(|delta| delta.new_file().path())
                    .map(|p| p.to_string_lossy().into_owned())
                    .or_else(|| entry.path().map(str::to_string))?;
                Some(StatusEntry {
                    path,
                    deleted: entry.status().intersects(Status::INDEX_DELETED | Status::WT_DELETED),
                })
            })
            .collect())
    }

    pub fn commit(&self, message: &str) -> Result<(), GitError> {
        self.run_git(&["commit", "-m", message], "commit").map(|_| ())
    }

    /// Push `branch` to `remote`, or HEAD when detached.
    pub fn push(&self, remote: &str, branch: Option<&str>) -> Result<(), GitError> {
        let refspec = branch.unwrap_or("HEAD");
        self.run_git(&["push", remote, refspec], "push").map(|_| ())
    }

    /// Run git in the working directory and return its stdout.
    fn run_git(&self, args: &[&str], operation: &str) -> Result<String, GitError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.workdir)
            .args(args)
            .output()
            .map_err(|source| GitError::Spawn {
                operation: operation.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                operation: operation.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
