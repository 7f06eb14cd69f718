use std::fmt;

use crate::git::error::GitError;
use crate::git::provider::{GitProvider, GitRepo, MergeInfo};
use crate::store::repository::MetadataStore;
use crate::store::{BranchPair, Repository, User};

use super::access::ensure_can_write_head;
use super::error::PullError;

/// `<base>...[<owner>:]<head>`, parsed but not yet checked against anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareSpec {
    pub base_branch: String,
    pub head_owner: Option<String>,
    pub head_branch: String,
}

impl CompareSpec {
    pub fn parse(raw: &str) -> Result<Self, PullError> {
        let parts: Vec<&str> = raw.split("...").collect();
        let [base_branch, head] = parts.as_slice() else {
            return Err(PullError::MalformedSpec(format!(
                "expected <base>...[<owner>:]<head>, got {raw:?}"
            )));
        };

        let head_parts: Vec<&str> = head.split(':').collect();
        let (head_owner, head_branch) = match head_parts.as_slice() {
            [branch] => (None, *branch),
            [owner, branch] => {
                if owner.is_empty() {
                    return Err(PullError::MalformedSpec(format!(
                        "empty owner qualifier in {raw:?}"
                    )));
                }
                (Some(owner.to_string()), *branch)
            }
            _ => {
                return Err(PullError::MalformedSpec(format!(
                    "head segment of {raw:?} has more than one owner qualifier"
                )));
            }
        };

        if base_branch.is_empty() || head_branch.is_empty() {
            return Err(PullError::MalformedSpec(format!(
                "empty branch name in {raw:?}"
            )));
        }

        Ok(Self {
            base_branch: base_branch.to_string(),
            head_owner,
            head_branch: head_branch.to_string(),
        })
    }
}

impl fmt::Display for CompareSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.head_owner {
            Some(owner) => write!(f, "{}...{}:{}", self.base_branch, owner, self.head_branch),
            None => write!(f, "{}...{}", self.base_branch, self.head_branch),
        }
    }
}

/// Both sides of a comparison, checked against the store and git.
#[derive(Debug, Clone)]
pub struct ResolvedCompare {
    /// True for `b...h` and for `b...<base owner>:h`.
    pub is_same_repository: bool,
    pub head_owner_name: String,
    pub head_repo: Repository,
    pub head_git: GitRepo,
    pub base_git: GitRepo,
    pub merge_info: MergeInfo,
    pub base_branch: String,
    pub head_branch: String,
}

impl ResolvedCompare {
    pub fn branch_pair(&self, base_repo: &Repository) -> BranchPair {
        BranchPair {
            head_repo_id: self.head_repo.id,
            base_repo_id: base_repo.id,
            head_branch: self.head_branch.clone(),
            base_branch: self.base_branch.clone(),
        }
    }
}

async fn ensure_branch(
    git: &dyn GitProvider,
    repo: &GitRepo,
    branch: &str,
) -> Result<(), PullError> {
    let exists = git
        .branch_exists(repo, branch)
        .await
        .map_err(PullError::ProviderFailure)?;
    if !exists {
        tracing::debug!(repo = %repo.identity, branch, "branch does not exist");
        return Err(PullError::UnknownBranch {
            repo: repo.identity.to_string(),
            branch: branch.to_string(),
        });
    }
    Ok(())
}

/// Resolve `raw` against `base_repo` on behalf of `principal`. Stops at the
/// first failure.
///
/// Write access to the head repository is checked as soon as that repository
/// is known. Computing the merge base of a fork fetches into the head store,
/// so it must not run for callers who cannot write there.
pub async fn resolve_compare(
    store: &dyn MetadataStore,
    git: &dyn GitProvider,
    principal: &User,
    base_repo: &Repository,
    raw: &str,
) -> Result<ResolvedCompare, PullError> {
    let spec = CompareSpec::parse(raw)?;
    tracing::trace!(base_repo_id = base_repo.id, compare = %spec, "parsed compare spec");

    let (head_owner_id, head_owner_name) = match &spec.head_owner {
        None => (base_repo.owner_id, base_repo.owner_name.clone()),
        Some(name) => {
            let user = store
                .get_user_by_name(name)
                .await
                .map_err(PullError::StoreFailure)?
                .ok_or_else(|| PullError::UnknownUser(name.clone()))?;
            (user.id, user.name)
        }
    };
    // A redundant owner qualifier naming the base owner still means "same repository".
    let is_same_repository = head_owner_id == base_repo.owner_id;

    let base_git = git
        .open(&base_repo.identity())
        .await
        .map_err(|source| PullError::RepositoryUnavailable {
            repo: base_repo.full_name(),
            source,
        })?;
    ensure_branch(git, &base_git, &spec.base_branch).await?;

    let (head_repo, head_git) = if is_same_repository {
        (base_repo.clone(), base_git.clone())
    } else {
        let fork = store
            .get_fork(head_owner_id, base_repo.id)
            .await
            .map_err(PullError::StoreFailure)?
            .ok_or_else(|| {
                tracing::debug!(base_repo_id = base_repo.id, owner = %head_owner_name, "no fork of base repository");
                PullError::NoForkRelationship {
                    owner: head_owner_name.clone(),
                    base: base_repo.full_name(),
                }
            })?;
        let fork_git =
            git.open(&fork.identity())
                .await
                .map_err(|source| PullError::RepositoryUnavailable {
                    repo: fork.full_name(),
                    source,
                })?;
        (fork, fork_git)
    };

    ensure_can_write_head(store, principal, &head_repo).await?;
    ensure_branch(git, &head_git, &spec.head_branch).await?;

    let merge_info = git
        .merge_info(&base_git, &spec.base_branch, &head_git, &spec.head_branch)
        .await
        .map_err(|e| match e {
            GitError::NoMergeBase { base, head } => {
                tracing::debug!(base_repo_id = base_repo.id, %base, %head, "no merge base");
                PullError::NoMergeBase { base, head }
            }
            other => PullError::ProviderFailure(other),
        })?;

    Ok(ResolvedCompare {
        is_same_repository,
        head_owner_name,
        head_repo,
        head_git,
        base_git,
        merge_info,
        base_branch: spec.base_branch,
        head_branch: spec.head_branch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulls::testing::world;

    #[test]
    fn parse_same_repository() {
        let spec = CompareSpec::parse("master...feature").unwrap();
        assert_eq!(spec.base_branch, "master");
        assert_eq!(spec.head_owner, None);
        assert_eq!(spec.head_branch, "feature");
        assert_eq!(spec.to_string(), "master...feature");
    }

    #[test]
    fn parse_cross_repository() {
        let spec = CompareSpec::parse("release/1.x...bob:fix/typo").unwrap();
        assert_eq!(spec.base_branch, "release/1.x");
        assert_eq!(spec.head_owner.as_deref(), Some("bob"));
        assert_eq!(spec.head_branch, "fix/typo");
        assert_eq!(spec.to_string(), "release/1.x...bob:fix/typo");
    }

    #[test]
    fn parse_rejects_wrong_separator_count() {
        for raw in [
            "master",
            "master..feature",
            "a...b...c",
            "",
            "master...bob:x:y",
            "master...:feature",
            "...feature",
            "master...",
            "master...bob:",
        ] {
            assert!(
                matches!(CompareSpec::parse(raw), Err(PullError::MalformedSpec(_))),
                "{raw:?} should be malformed"
            );
        }
    }

    #[tokio::test]
    async fn resolves_same_repository() {
        let w = world().await;
        let r = resolve_compare(&*w.store, &*w.git, &w.alice, &w.base, "master...topic")
            .await
            .unwrap();
        assert!(r.is_same_repository);
        assert_eq!(r.head_repo.id, w.base.id);
        assert_eq!(r.head_owner_name, "alice");
        assert_eq!(r.base_branch, "master");
        assert_eq!(r.head_branch, "topic");
        assert_eq!(r.merge_info.merge_base, "c2");
        assert_eq!(r.merge_info.commits, vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn self_qualified_owner_collapses_to_same_repository() {
        let w = world().await;
        let r = resolve_compare(&*w.store, &*w.git, &w.alice, &w.base, "master...ALICE:topic")
            .await
            .unwrap();
        assert!(r.is_same_repository);
        assert_eq!(r.head_repo.id, w.base.id);
        assert_eq!(r.head_git, r.base_git);
    }

    #[tokio::test]
    async fn resolves_fork() {
        let w = world().await;
        let r = resolve_compare(&*w.store, &*w.git, &w.bob, &w.base, "master...bob:feature")
            .await
            .unwrap();
        assert!(!r.is_same_repository);
        assert_eq!(r.head_repo.id, w.fork.id);
        assert_eq!(r.head_owner_name, "bob");
        assert_eq!(r.merge_info.merge_base, "c1");
        assert_eq!(r.branch_pair(&w.base).head_repo_id, w.fork.id);
    }

    #[tokio::test]
    async fn resolution_failures() {
        let w = world().await;
        let resolve = |raw: &'static str| resolve_compare(&*w.store, &*w.git, &w.alice, &w.base, raw);

        assert!(matches!(
            resolve("master...ghost:feature").await,
            Err(PullError::UnknownUser(ref u)) if u == "ghost"
        ));
        assert!(matches!(
            resolve("nope...topic").await,
            Err(PullError::UnknownBranch { ref branch, .. }) if branch == "nope"
        ));
        assert!(matches!(
            resolve("master...nope").await,
            Err(PullError::UnknownBranch { ref branch, .. }) if branch == "nope"
        ));
        assert!(matches!(
            resolve("master...dave:feature").await,
            Err(PullError::NoForkRelationship { .. })
        ));
        assert!(matches!(
            resolve("master~1...master").await,
            Err(PullError::UnknownBranch { ref branch, .. }) if branch == "master~1"
        ));
        assert!(matches!(
            resolve("master...lonely").await,
            Err(PullError::NoMergeBase { .. })
        ));

        w.git.mark_unavailable("bob", "widgets");
        assert!(matches!(
            resolve("master...bob:feature").await,
            Err(PullError::RepositoryUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn head_access_is_checked_before_merge_base() {
        let w = world().await;
        let err = resolve_compare(&*w.store, &*w.git, &w.carol, &w.base, "master...bob:feature")
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::Forbidden(_)));
        assert_eq!(w.git.merge_info_calls(), 0);

        resolve_compare(&*w.store, &*w.git, &w.carol, &w.base, "master...carol:feature")
            .await
            .unwrap();
        assert_eq!(w.git.merge_info_calls(), 1);
    }
}
