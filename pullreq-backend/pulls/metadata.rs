use std::collections::HashSet;

use crate::store::repository::MetadataStore;
use crate::store::{Repository, User};

use super::access::can_write;
use super::error::PullError;

/// Labels, milestone and assignee to attach to the tracking issue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalMetadata {
    pub label_ids: Vec<i64>,
    pub milestone_id: Option<i64>,
    pub assignee_id: Option<i64>,
}

/// Parse `"1, 2,x,2"` into `[1, 2]`. Tokens that are not integers are skipped.
pub fn parse_label_ids(raw: &str) -> Vec<i64> {
    let mut seen = HashSet::new();
    raw.split(',')
        .filter_map(|token| token.trim().parse::<i64>().ok())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Check the requested metadata against the base repository.
///
/// Callers who cannot write the base repository get an empty result rather
/// than an error. Unknown labels are dropped; an unknown milestone or an
/// ineligible assignee fails the whole request. Ids `<= 0` mean "unset".
pub async fn validate_metadata(
    store: &dyn MetadataStore,
    principal: &User,
    base_repo: &Repository,
    labels: &str,
    milestone_id: i64,
    assignee_id: i64,
) -> Result<ProposalMetadata, PullError> {
    if !can_write(store, principal, base_repo).await? {
        tracing::debug!(user = %principal.name, base_repo_id = base_repo.id, "not a writer of base repository, clearing metadata");
        return Ok(ProposalMetadata::default());
    }

    let requested = parse_label_ids(labels);
    let label_ids = if requested.is_empty() {
        requested
    } else {
        let known: HashSet<i64> = store
            .labels(base_repo.id)
            .await
            .map_err(PullError::StoreFailure)?
            .into_iter()
            .map(|l| l.id)
            .collect();
        let (kept, dropped): (Vec<i64>, Vec<i64>) =
            requested.into_iter().partition(|id| known.contains(id));
        if !dropped.is_empty() {
            tracing::debug!(base_repo_id = base_repo.id, ?dropped, "dropping labels not in base repository");
        }
        kept
    };

    let milestone_id = if milestone_id > 0 {
        store
            .get_milestone(base_repo.id, milestone_id)
            .await
            .map_err(PullError::StoreFailure)?
            .ok_or_else(|| {
                PullError::ValidationFailed(format!(
                    "milestone {milestone_id} does not exist in {}",
                    base_repo.full_name()
                ))
            })?;
        Some(milestone_id)
    } else {
        None
    };

    let assignee_id = if assignee_id > 0 {
        let eligible = store
            .assignees(base_repo.id)
            .await
            .map_err(PullError::StoreFailure)?
            .iter()
            .any(|u| u.id == assignee_id);
        if !eligible {
            return Err(PullError::ValidationFailed(format!(
                "user {assignee_id} cannot be assigned in {}",
                base_repo.full_name()
            )));
        }
        Some(assignee_id)
    } else {
        None
    };

    Ok(ProposalMetadata {
        label_ids,
        milestone_id,
        assignee_id,
    })
}
