//! Guards around a commit run: refuse unsafe states, keep a copy of the
//! index, and check afterwards that no working tree files went missing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Local;
use git2::RepositoryState;
use tempfile::TempDir;
use tracing::{debug, info};

use super::{GitRepo, StatusEntry};
use crate::error::{CommitError, GitError};

/// Refuse to run mid-merge, mid-rebase, mid-cherry-pick, mid-revert or on a
/// detached HEAD.
pub fn check_safe_state(repo: &GitRepo) -> Result<(), CommitError> {
    let state = match repo.state() {
        RepositoryState::Clean => None,
        RepositoryState::Merge => Some("a merge is in progress"),
        RepositoryState::Rebase
        | RepositoryState::RebaseInteractive
        | RepositoryState::RebaseMerge
        | RepositoryState::ApplyMailbox
        | RepositoryState::ApplyMailboxOrRebase => Some("a rebase is in progress"),
        RepositoryState::CherryPick | RepositoryState::CherryPickSequence => {
            Some("a cherry-pick is in progress")
        }
        RepositoryState::Revert | RepositoryState::RevertSequence => {
            Some("a revert is in progress")
        }
        RepositoryState::Bisect => Some("a bisect is in progress"),
    };
    if let Some(reason) = state {
        return Err(CommitError::UnsafeRepository(reason.to_string()));
    }
    if repo.is_head_detached()? {
        return Err(CommitError::UnsafeRepository("HEAD is detached".to_string()));
    }
    Ok(())
}

/// Copy of `.git/index` kept for the duration of a run.
///
/// The backup directory is removed when this is dropped.
#[derive(Debug)]
pub struct IndexBackup {
    dir: TempDir,
    source: PathBuf,
}

impl IndexBackup {
    /// Back up the index, if the repository has one yet.
    pub fn create(repo: &GitRepo) -> Result<Option<Self>, GitError> {
        let source = repo.git_dir().join("index");
        if !source.exists() {
            debug!("No index to back up");
            return Ok(None);
        }
        let prefix = format!("autocommit-backup-{}-", Local::now().format("%Y%m%d_%H%M%S"));
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir()
            .map_err(GitError::Backup)?;
        std::fs::copy(&source, dir.path().join("index")).map_err(GitError::Backup)?;
        info!("Backed up the index to {}", dir.path().display());
        Ok(Some(Self { dir, source }))
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Put the saved index back in place.
    pub fn restore(&self) -> Result<(), GitError> {
        std::fs::copy(self.dir.path().join("index"), &self.source).map_err(GitError::Backup)?;
        info!("Restored the index from {}", self.dir.path().display());
        Ok(())
    }
}

/// Paths present in `before` that are gone from `after`, ignoring entries
/// that were deletions to begin with and the paths that were committed.
pub fn missing_files(
    before: &[StatusEntry],
    after: &[StatusEntry],
    committed: &[String],
) -> Vec<String> {
    let after = present_paths(after);
    let committed: HashSet<&str> = committed.iter().map(String::as_str).collect();
    let mut missing: Vec<String> = present_paths(before)
        .into_iter()
        .filter(|path| !after.contains(path) && !committed.contains(path))
        .map(str::to_string)
        .collect();
    missing.sort();
    missing
}

fn present_paths(entries: &[StatusEntry]) -> HashSet<&str> {
    entries
        .iter()
        .filter(|entry| !entry.deleted)
        .map(|entry| entry.path.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};

    fn repo_with_commit() -> (tempfile::TempDir, Repository, git2::Oid) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("a.txt")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
        drop(tree);
        (dir, repo, oid)
    }

    #[test]
    fn clean_branch_is_safe() {
        let (dir, _repo, _) = repo_with_commit();
        let git = GitRepo::discover(dir.path()).unwrap();
        assert!(check_safe_state(&git).is_ok());
    }

    #[test]
    fn detached_head_is_unsafe() {
        let (dir, repo, oid) = repo_with_commit();
        repo.set_head_detached(oid).unwrap();
        let git = GitRepo::discover(dir.path()).unwrap();
        let err = check_safe_state(&git).unwrap_err();
        assert!(err.to_string().contains("HEAD is detached"));
    }

    #[test]
    fn merge_in_progress_is_unsafe() {
        let (dir, repo, oid) = repo_with_commit();
        std::fs::write(repo.path().join("MERGE_HEAD"), format!("{oid}\n")).unwrap();
        let git = GitRepo::discover(dir.path()).unwrap();
        let err = check_safe_state(&git).unwrap_err();
        assert!(matches!(err, CommitError::UnsafeRepository(ref r) if r.contains("merge")));
    }

    #[test]
    fn index_backup_restores_and_cleans_up() {
        let (dir, repo, _) = repo_with_commit();
        let git = GitRepo::discover(dir.path()).unwrap();
        let index_path = repo.path().join("index");
        let original = std::fs::read(&index_path).unwrap();

        let backup = IndexBackup::create(&git).unwrap().unwrap();
        let backup_dir = backup.path().to_path_buf();
        assert!(
            backup_dir
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("autocommit-backup-")
        );

        std::fs::write(&index_path, b"corrupted").unwrap();
        backup.restore().unwrap();
        assert_eq!(std::fs::read(&index_path).unwrap(), original);

        drop(backup);
        assert!(!backup_dir.exists());
    }

    #[test]
    fn fresh_repository_has_nothing_to_back_up() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let git = GitRepo::discover(dir.path()).unwrap();
        assert!(IndexBackup::create(&git).unwrap().is_none());
    }

    fn entry(path: &str, deleted: bool) -> StatusEntry {
        StatusEntry {
            path: path.to_string(),
            deleted,
        }
    }

    #[test]
    fn missing_files_skips_committed_and_deleted_paths() {
        let before = vec![
            entry("src/lib.rs", false),
            entry("notes.txt", false),
            entry("gone.txt", true),
            entry("new.rs", false),
            entry("scratch.md", false),
        ];
        let after = vec![entry("scratch.md", false)];
        let committed = vec!["src/lib.rs".to_string(), "new.rs".to_string()];
        assert_eq!(missing_files(&before, &after, &committed), vec!["notes.txt"]);
        assert!(missing_files(&before, &before, &[]).is_empty());
    }

    #[test]
    fn names_with_spaces_survive_a_commit() {
        let (dir, repo, _) = repo_with_commit();
        std::fs::write(dir.path().join("draft notes.md"), "wip\n").unwrap();
        std::fs::write(dir.path().join("ünïcode.txt"), "x\n").unwrap();
        std::fs::write(dir.path().join("a.txt"), "two\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("a.txt")).unwrap();
        index.write().unwrap();

        let git = GitRepo::discover(dir.path()).unwrap();
        let before = git.status_entries().unwrap();
        let staged = git.staged_files().unwrap();

        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        let parent = repo.head().unwrap().peel_to_commit().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "update a", &tree, &[&parent])
            .unwrap();

        let after = git.status_entries().unwrap();
        assert!(missing_files(&before, &after, &staged).is_empty());

        std::fs::remove_file(dir.path().join("draft notes.md")).unwrap();
        let after = git.status_entries().unwrap();
        assert_eq!(missing_files(&before, &after, &staged), vec!["draft notes.md"]);
    }
}
