//! Version control for the verification loop's commit and revert points.

pub mod git;

pub use git::GitTracker;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct CommitRequest {
    pub repo_path: PathBuf,
    pub commit_message: String,
    pub remote_name: String,
    pub branch_name: String,
}

impl CommitRequest {
    pub fn new(repo_path: &Path, message: &str) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            commit_message: message.to_string(),
            remote_name: "origin".to_string(),
            branch_name: "main".to_string(),
        }
    }

    pub fn with_remote(mut self, remote: &str, branch: &str) -> Self {
        self.remote_name = remote.to_string();
        self.branch_name = branch.to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Working tree matched HEAD.
    NothingToCommit,
    Committed { sha: String, pushed: bool },
}

/// Both operations initialize a repository at the path when none exists.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn commit_and_push(&self, request: &CommitRequest) -> Result<CommitOutcome>;

    /// Discard working tree changes back to the last commit.
    async fn reset_hard(&self, repo_path: &Path) -> Result<()>;
}
