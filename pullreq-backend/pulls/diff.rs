use crate::git::provider::{GitProvider, GitRepo, MergeInfo};

use super::error::PullError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffDecision {
    /// The head branch tip is the merge base: no new commits to propose.
    NothingToCompare { head_commit: String },
    Proceed { head_commit: String },
}

impl DiffDecision {
    pub fn decide(head_commit: String, merge_base: &str) -> Self {
        if head_commit == merge_base {
            DiffDecision::NothingToCompare { head_commit }
        } else {
            DiffDecision::Proceed { head_commit }
        }
    }
}

pub async fn prepare_compare_diff(
    git: &dyn GitProvider,
    head_git: &GitRepo,
    head_branch: &str,
    merge_info: &MergeInfo,
) -> Result<DiffDecision, PullError> {
    let head_commit = git
        .branch_commit_id(head_git, head_branch)
        .await
        .map_err(PullError::ProviderFailure)?;

    let decision = DiffDecision::decide(head_commit, &merge_info.merge_base);
    if let DiffDecision::NothingToCompare { head_commit } = &decision {
        tracing::debug!(
            repo = %head_git.identity,
            head_branch,
            head_commit = %head_commit,
            "nothing to compare: head is the merge base"
        );
    }
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::provider::RepoIdentity;
    use crate::pulls::testing::world;

    #[test]
    fn equal_commit_means_nothing_to_compare() {
        assert_eq!(
            DiffDecision::decide("abc".into(), "abc"),
            DiffDecision::NothingToCompare {
                head_commit: "abc".into()
            }
        );
        assert_eq!(
            DiffDecision::decide("def".into(), "abc"),
            DiffDecision::Proceed {
                head_commit: "def".into()
            }
        );
    }

    #[tokio::test]
    async fn uses_current_head_tip() {
        let w = world().await;
        let head = w
            .git
            .open(&RepoIdentity::new("bob", "widgets"))
            .await
            .unwrap();
        let info = MergeInfo {
            merge_base: "c1".into(),
            commits: vec![],
        };

        let behind = prepare_compare_diff(&*w.git, &head, "behind", &info)
            .await
            .unwrap();
        assert!(matches!(behind, DiffDecision::NothingToCompare { .. }));

        let ahead = prepare_compare_diff(&*w.git, &head, "feature", &info)
            .await
            .unwrap();
        assert_eq!(
            ahead,
            DiffDecision::Proceed {
                head_commit: "f1".into()
            }
        );

        let err = prepare_compare_diff(&*w.git, &head, "gone", &info)
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::ProviderFailure(_)));
    }
}
