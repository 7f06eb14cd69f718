use std::sync::Arc;

use anyhow::anyhow;

use crate::git::provider::GitProvider;
use crate::store::repository::{CreateError, MetadataStore};
use crate::store::{NewIssue, NewPullRequest, PullRequestKind, Repository, User};

use super::compare::{ResolvedCompare, resolve_compare};
use super::diff::{DiffDecision, prepare_compare_diff};
use super::error::PullError;
use super::metadata::validate_metadata;

/// A request to open a pull request against a base repository.
#[derive(Debug, Clone, Default)]
pub struct CreatePullRequest {
    /// `<base>...[<owner>:]<head>`
    pub compare: String,
    pub title: String,
    pub body: String,
    /// Comma-separated label ids.
    pub labels: String,
    pub milestone_id: i64,
    pub assignee_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created {
        issue_id: i64,
        index: i64,
        pull_request_id: i64,
        /// Set when the records were written but `refs/pull/<index>/head`
        /// could not be pushed into the base repository.
        propagation_error: Option<String>,
    },
    /// An unmerged pull request already exists for the same branch pair.
    Duplicate { issue_id: i64, index: i64 },
    /// The head branch has no commits beyond the merge base.
    NothingToCompare,
}

pub struct PullRequestCreator {
    store: Arc<dyn MetadataStore>,
    git: Arc<dyn GitProvider>,
}

impl PullRequestCreator {
    pub fn new(store: Arc<dyn MetadataStore>, git: Arc<dyn GitProvider>) -> Self {
        Self { store, git }
    }

    #[tracing::instrument(
        skip_all,
        fields(user = %principal.name, base_repo = %base_repo.full_name(), compare = %req.compare)
    )]
    pub async fn create(
        &self,
        principal: &User,
        base_repo: &Repository,
        req: &CreatePullRequest,
    ) -> Result<CreateOutcome, PullError> {
        let result = self.run(principal, base_repo, req).await;
        match &result {
            Ok(CreateOutcome::Created { index, .. }) => {
                tracing::info!(index, "pull request created");
            }
            Ok(outcome) => tracing::info!(?outcome, "pull request not created"),
            Err(e) if e.is_server_error() => {
                tracing::error!(base_repo_id = base_repo.id, error = %e, "pull request creation failed");
            }
            Err(e) => tracing::debug!(error = %e, "pull request rejected"),
        }
        result
    }

    async fn run(
        &self,
        principal: &User,
        base_repo: &Repository,
        req: &CreatePullRequest,
    ) -> Result<CreateOutcome, PullError> {
        let store = self.store.as_ref();
        let git = self.git.as_ref();

        let resolved = resolve_compare(store, git, principal, base_repo, &req.compare).await?;
        tracing::debug!(
            same_repository = resolved.is_same_repository,
            head_owner = %resolved.head_owner_name,
            head_repo_id = resolved.head_repo.id,
            merge_base = %resolved.merge_info.merge_base,
            ahead = resolved.merge_info.commits.len(),
            "compare resolved"
        );

        let pair = resolved.branch_pair(base_repo);
        if let Some(existing) = store
            .get_unmerged_pull_request(&pair)
            .await
            .map_err(PullError::StoreFailure)?
        {
            return Ok(CreateOutcome::Duplicate {
                issue_id: existing.issue_id,
                index: existing.index,
            });
        }

        let decision = prepare_compare_diff(
            git,
            &resolved.head_git,
            &resolved.head_branch,
            &resolved.merge_info,
        )
        .await?;
        let head_commit = match decision {
            DiffDecision::NothingToCompare { .. } => return Ok(CreateOutcome::NothingToCompare),
            DiffDecision::Proceed { head_commit } => head_commit,
        };

        let metadata = validate_metadata(
            store,
            principal,
            base_repo,
            &req.labels,
            req.milestone_id,
            req.assignee_id,
        )
        .await?;

        let patch = git
            .patch(
                &resolved.head_git,
                &resolved.merge_info.merge_base,
                &resolved.head_branch,
            )
            .await
            .map_err(PullError::ProviderFailure)?;
        tracing::debug!(head_commit = %head_commit, patch_bytes = patch.len(), "patch captured");

        let issue = NewIssue {
            repo_id: base_repo.id,
            title: req.title.clone(),
            poster_id: principal.id,
            milestone_id: metadata.milestone_id,
            assignee_id: metadata.assignee_id,
            content: req.body.clone(),
            label_ids: metadata.label_ids,
        };
        let pull = NewPullRequest {
            head_repo_id: resolved.head_repo.id,
            base_repo_id: base_repo.id,
            head_user_name: resolved.head_repo.owner_name.clone(),
            head_branch: resolved.head_branch.clone(),
            base_branch: resolved.base_branch.clone(),
            merge_base: resolved.merge_info.merge_base.clone(),
            kind: PullRequestKind::Native,
            patch,
        };

        let created = match store.create_pull_request(issue, pull).await {
            Ok(created) => created,
            Err(CreateError::Duplicate(pair)) => {
                // Lost the race to a concurrent request for the same pair.
                let winner = store
                    .get_unmerged_pull_request(&pair)
                    .await
                    .map_err(PullError::StoreFailure)?
                    .ok_or_else(|| {
                        PullError::StoreFailure(anyhow!(
                            "conflicting pull request for {pair} vanished"
                        ))
                    })?;
                return Ok(CreateOutcome::Duplicate {
                    issue_id: winner.issue_id,
                    index: winner.index,
                });
            }
            Err(CreateError::Store(e)) => return Err(PullError::StoreFailure(e)),
        };

        let propagation_error = self.propagate(&resolved, created.index).await;

        Ok(CreateOutcome::Created {
            issue_id: created.issue_id,
            index: created.index,
            pull_request_id: created.pull_request_id,
            propagation_error,
        })
    }

    async fn propagate(&self, resolved: &ResolvedCompare, index: i64) -> Option<String> {
        let pushed = self
            .git
            .push_pull_ref(
                &resolved.head_git,
                &resolved.head_branch,
                &resolved.base_git,
                index,
            )
            .await;
        match pushed {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(
                    head_repo = %resolved.head_git.identity,
                    base_repo = %resolved.base_git.identity,
                    head_branch = %resolved.head_branch,
                    index,
                    error = %e,
                    "failed to push pull request ref"
                );
                Some(e.to_string())
            }
        }
    }
}
