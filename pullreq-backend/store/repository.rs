use anyhow::Result;
use async_trait::async_trait;

use super::{
    AccessMode, BranchPair, CreatedPullRequest, Issue, Label, Milestone, NewIssue,
    NewPullRequest, PullRequest, Repository, User,
};

/// Failure of the all-or-nothing pull request insert.
#[derive(thiserror::Error, Debug)]
pub enum CreateError {
    /// Another unmerged pull request for the same branch pair committed first.
    #[error("an unmerged pull request already exists for {0}")]
    Duplicate(BranchPair),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_user_by_name(&self, name: &str) -> Result<Option<User>>;
    /// Case-insensitive on both owner and repository name.
    async fn get_repository(&self, owner: &str, name: &str) -> Result<Option<Repository>>;
    /// The repository `owner_id` forked from `base_repo_id`, if one exists.
    async fn get_fork(&self, owner_id: i64, base_repo_id: i64) -> Result<Option<Repository>>;
    /// Owners are `Admin`; collaborators get their recorded mode; everyone else `None`.
    async fn access_mode(&self, user_id: i64, repo_id: i64) -> Result<Option<AccessMode>>;
    async fn labels(&self, repo_id: i64) -> Result<Vec<Label>>;
    async fn get_milestone(&self, repo_id: i64, milestone_id: i64) -> Result<Option<Milestone>>;
    /// Users who may be assigned issues: the owner plus write/admin collaborators.
    async fn assignees(&self, repo_id: i64) -> Result<Vec<User>>;
    async fn get_issue(&self, issue_id: i64) -> Result<Option<Issue>>;
    async fn get_unmerged_pull_request(&self, pair: &BranchPair) -> Result<Option<PullRequest>>;
    async fn list_pull_requests(&self, base_repo_id: i64) -> Result<Vec<PullRequest>>;

    /// Insert the issue (with the next index for its repository), its labels and
    /// the pull request in one transaction. Nothing is visible unless all of it is.
    async fn create_pull_request(
        &self,
        issue: NewIssue,
        pull: NewPullRequest,
    ) -> std::result::Result<CreatedPullRequest, CreateError>;

    async fn create_user(&self, name: &str, is_admin: bool) -> Result<User>;
    async fn create_repository(
        &self,
        owner_id: i64,
        name: &str,
        fork_id: Option<i64>,
    ) -> Result<Repository>;
    async fn set_collaborator(&self, repo_id: i64, user_id: i64, mode: AccessMode) -> Result<()>;
    async fn create_label(&self, repo_id: i64, name: &str, color: &str) -> Result<Label>;
    async fn create_milestone(&self, repo_id: i64, name: &str) -> Result<Milestone>;
}
