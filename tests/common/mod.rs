//! Shared test utilities for integration tests.
//!
//! Not all functions are used by every test file, but they're shared across tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use git2::{Oid, Repository, Signature};

use autocommit::error::InvocationError;
use autocommit::llm::{InvokeRequest, ModelBackend};

type Responder = dyn Fn(&InvokeRequest, usize) -> Result<String, InvocationError> + Send + Sync;

/// A model backend answering from a closure and recording every call.
///
/// The closure gets the request and the zero-based call index.
pub struct ScriptedBackend {
    responder: Box<Responder>,
    delay: Option<Box<dyn Fn(&InvokeRequest) -> Duration + Send + Sync>>,
    calls: Mutex<Vec<InvokeRequest>>,
}

impl ScriptedBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&InvokeRequest, usize) -> Result<String, InvocationError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Same text for every call.
    pub fn always(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    /// Sleep before answering, for exercising completion order.
    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&InvokeRequest) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn calls(&self) -> Vec<InvokeRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn invoke(&self, request: &InvokeRequest) -> Result<String, InvocationError> {
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(request)).await;
        }
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len() - 1
        };
        (self.responder)(request, index)
    }
}

/// A timeout as the HTTP backend reports it.
pub fn timeout_error() -> InvocationError {
    InvocationError::Timeout {
        model: "gpt-4o-mini".to_string(),
        secs: 60,
    }
}

/// A single-file diff adding `lines` similar lines to `path`.
pub fn file_diff(path: &str, lines: usize) -> String {
    let mut chunk = format!(
        "diff --git a/{path} b/{path}\nindex 0000000..1111111 100644\n--- a/{path}\n+++ b/{path}\n@@ -0,0 +1,{lines} @@\n"
    );
    for i in 0..lines {
        chunk.push_str(&format!("+let value_{i} = compute_something({i});\n"));
    }
    chunk
}

/// A diff over `paths`, each file adding `lines` lines.
pub fn multi_file_diff<S: AsRef<str>>(paths: &[S], lines: usize) -> String {
    paths.iter().map(|p| file_diff(p.as_ref(), lines)).collect()
}

/// A test git repository builder for integration tests.
pub struct TestRepo {
    pub dir: tempfile::TempDir,
    pub repo: Repository,
}

impl TestRepo {
    /// Create a new repository on branch `main` with a committer identity.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let repo = Repository::init(dir.path()).expect("Failed to init git repo");
        repo.set_head("refs/heads/main").expect("Failed to set HEAD");
        {
            let mut config = repo.config().expect("Failed to open config");
            config.set_str("user.name", "Test User").expect("Failed to set name");
            config
                .set_str("user.email", "test@example.com")
                .expect("Failed to set email");
            config
                .set_bool("commit.gpgsign", false)
                .expect("Failed to disable signing");
        }
        Self { dir, repo }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file without staging it.
    pub fn write(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Write a file and add it to the index.
    pub fn stage(&self, name: &str, content: &str) {
        self.write(name, content);
        let mut index = self.repo.index().expect("Failed to get index");
        index.add_path(Path::new(name)).expect("Failed to add file");
        index.write().expect("Failed to write index");
    }

    /// Commit the current index. Returns the commit OID.
    pub fn commit(&self, message: &str) -> Oid {
        let sig = Signature::now("Test User", "test@example.com").expect("Failed to create signature");
        let mut index = self.repo.index().expect("Failed to get index");
        let tree_id = index.write_tree().expect("Failed to write tree");
        let tree = self.repo.find_tree(tree_id).expect("Failed to find tree");
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .expect("Failed to create commit")
    }

    /// Point `refs/remotes/<remote>/main` at `oid`, as a fetch would.
    pub fn set_remote_tracking(&self, remote: &str, oid: Oid) {
        self.repo
            .reference(&format!("refs/remotes/{remote}/main"), oid, true, "test")
            .expect("Failed to create remote-tracking ref");
    }

    /// Message of the commit at HEAD.
    pub fn head_message(&self) -> String {
        self.repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map(|c| c.message().unwrap_or_default().to_string())
            .expect("Failed to read HEAD commit")
    }
}
