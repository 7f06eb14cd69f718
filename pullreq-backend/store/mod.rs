pub mod repository;
pub mod sqlite_repository;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::git::provider::RepoIdentity;

/// A principal that can own repositories and act on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub owner_id: i64,
    /// Denormalized so the git path can be built without another lookup.
    pub owner_name: String,
    pub name: String,
    /// The repository this one was forked from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_id: Option<i64>,
    #[serde(default)]
    pub num_pulls: i64,
}

impl Repository {
    pub fn identity(&self) -> RepoIdentity {
        RepoIdentity::new(&self.owner_name, &self.name)
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner_name, self.name)
    }
}

/// Collaborator access level. Ordered: `Read < Write < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
    Admin,
}

impl AccessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(AccessMode::Read),
            "write" => Some(AccessMode::Write),
            "admin" => Some(AccessMode::Admin),
            _ => None,
        }
    }

    pub fn can_write(self) -> bool {
        self >= AccessMode::Write
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    pub repo_id: i64,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: i64,
    pub repo_id: i64,
    pub name: String,
    #[serde(default)]
    pub is_closed: bool,
}

/// Tracking record. Every pull request is backed by exactly one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub repo_id: i64,
    /// Sequential per repository, starting at 1.
    pub index: i64,
    pub title: String,
    pub poster_id: i64,
    pub milestone_id: Option<i64>,
    pub assignee_id: Option<i64>,
    pub is_pull: bool,
    pub content: String,
    pub label_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

/// Where a pull request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestKind {
    /// Opened through this service.
    Native,
    /// Mirrored from an external forge. Rows of this kind are written by
    /// mirroring tooling outside this service and are only ever read here.
    Mirror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestStatus {
    /// Every pull request starts here.
    Checking,
    /// Set by the external merge checker, never by this service.
    Mergeable,
    /// Set by the external merge checker, never by this service.
    Conflict,
}

impl PullRequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PullRequestKind::Native => "native",
            PullRequestKind::Mirror => "mirror",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "native" => Some(PullRequestKind::Native),
            "mirror" => Some(PullRequestKind::Mirror),
            _ => None,
        }
    }
}

impl PullRequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PullRequestStatus::Checking => "checking",
            PullRequestStatus::Mergeable => "mergeable",
            PullRequestStatus::Conflict => "conflict",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "checking" => Some(PullRequestStatus::Checking),
            "mergeable" => Some(PullRequestStatus::Mergeable),
            "conflict" => Some(PullRequestStatus::Conflict),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: i64,
    pub issue_id: i64,
    pub index: i64,
    pub head_repo_id: i64,
    pub base_repo_id: i64,
    /// Kept even if the head repository is deleted later.
    pub head_user_name: String,
    pub head_branch: String,
    pub base_branch: String,
    pub merge_base: String,
    pub kind: PullRequestKind,
    pub status: PullRequestStatus,
    pub has_merged: bool,
    /// Unified diff captured at creation. Never rewritten.
    #[serde(skip_serializing)]
    pub patch: String,
    pub created_at: DateTime<Utc>,
}

/// The tuple that may have at most one unmerged pull request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchPair {
    pub head_repo_id: i64,
    pub base_repo_id: i64,
    pub head_branch: String,
    pub base_branch: String,
}

impl fmt::Display for BranchPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "repo {}:{} -> repo {}:{}",
            self.head_repo_id, self.head_branch, self.base_repo_id, self.base_branch
        )
    }
}

/// Issue half of a creation request. The index is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewIssue {
    pub repo_id: i64,
    pub title: String,
    pub poster_id: i64,
    pub milestone_id: Option<i64>,
    pub assignee_id: Option<i64>,
    pub content: String,
    pub label_ids: Vec<i64>,
}

/// Pull-request half of a creation request.
#[derive(Debug, Clone)]
pub struct NewPullRequest {
    pub head_repo_id: i64,
    pub base_repo_id: i64,
    pub head_user_name: String,
    pub head_branch: String,
    pub base_branch: String,
    pub merge_base: String,
    pub kind: PullRequestKind,
    pub patch: String,
}

impl NewPullRequest {
    pub fn branch_pair(&self) -> BranchPair {
        BranchPair {
            head_repo_id: self.head_repo_id,
            base_repo_id: self.base_repo_id,
            head_branch: self.head_branch.clone(),
            base_branch: self.base_branch.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedPullRequest {
    pub issue_id: i64,
    pub pull_request_id: i64,
    pub index: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode_ordering_gates_write() {
        assert!(!AccessMode::Read.can_write());
        assert!(AccessMode::Write.can_write());
        assert!(AccessMode::Admin.can_write());
        assert_eq!(AccessMode::parse("write"), Some(AccessMode::Write));
        assert_eq!(AccessMode::parse("owner"), None);
    }

    #[test]
    fn text_enums_match_serde_names() {
        for kind in [PullRequestKind::Native, PullRequestKind::Mirror] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(PullRequestKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(
            PullRequestStatus::parse("checking"),
            Some(PullRequestStatus::Checking)
        );
        assert_eq!(PullRequestStatus::parse("open"), None);
    }

    #[test]
    fn repository_identity_uses_owner_name() {
        let repo = Repository {
            id: 3,
            owner_id: 1,
            owner_name: "alice".into(),
            name: "widgets".into(),
            fork_id: None,
            num_pulls: 0,
        };
        assert_eq!(repo.identity().to_string(), "alice/widgets");
        assert_eq!(repo.full_name(), "alice/widgets");
    }
}
