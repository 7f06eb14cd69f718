use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::GitError;

/// Owner name + repository name. Addresses one version-control repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoIdentity {
    pub owner: String,
    pub name: String,
}

impl RepoIdentity {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// An opened repository. Cheap to clone; holds no file handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRepo {
    pub identity: RepoIdentity,
    pub path: PathBuf,
}

/// Result of comparing a head branch against a base branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeInfo {
    pub merge_base: String,
    /// Commits on the head branch not reachable from the merge base, newest first.
    pub commits: Vec<String>,
}

#[async_trait]
pub trait GitProvider: Send + Sync {
    async fn open(&self, repo: &RepoIdentity) -> Result<GitRepo, GitError>;
    async fn branch_exists(&self, repo: &GitRepo, branch: &str) -> Result<bool, GitError>;
    async fn branch_commit_id(&self, repo: &GitRepo, branch: &str) -> Result<String, GitError>;
    /// Merge base of `base_branch` (in `base`) and `head_branch` (in `head`).
    /// Returns `GitError::NoMergeBase` when the histories are unrelated.
    async fn merge_info(
        &self,
        base: &GitRepo,
        base_branch: &str,
        head: &GitRepo,
        head_branch: &str,
    ) -> Result<MergeInfo, GitError>;
    /// Unified diff from `from_commit` to the tip of `to_branch`.
    async fn patch(&self, repo: &GitRepo, from_commit: &str, to_branch: &str)
    -> Result<String, GitError>;
    /// Publish `head_branch` into `base` as `refs/pull/<index>/head`.
    async fn push_pull_ref(
        &self,
        head: &GitRepo,
        head_branch: &str,
        base: &GitRepo,
        index: i64,
    ) -> Result<(), GitError>;
}

pub fn pull_ref(index: i64) -> String {
    format!("refs/pull/{index}/head")
}
