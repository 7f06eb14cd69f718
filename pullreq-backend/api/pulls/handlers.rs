use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::AppState;
use crate::api::auth;
use crate::pulls::creator::{CreateOutcome, CreatePullRequest};
use crate::pulls::error::PullError;
use crate::store::Repository;

type ApiResult = Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)>;

fn error_response(e: &PullError) -> (StatusCode, Json<Value>) {
    (e.status_code(), Json(json!({ "error": e.to_string() })))
}

async fn base_repository(
    state: &AppState,
    owner: &str,
    repo: &str,
) -> Result<Repository, (StatusCode, Json<Value>)> {
    let found = state
        .store
        .get_repository(owner, repo)
        .await
        .map_err(|e| {
            tracing::error!(owner, repo, error = %e, "failed to look up repository");
            error_response(&PullError::StoreFailure(e))
        })?;
    found.ok_or_else(|| error_response(&PullError::RepositoryNotFound(format!("{owner}/{repo}"))))
}

#[derive(Deserialize)]
pub(crate) struct CreatePullRequestBody {
    title: String,
    #[serde(default)]
    body: String,
    /// Comma-separated label ids, e.g. `"1,4"`.
    #[serde(default)]
    labels: String,
    #[serde(default)]
    milestone: i64,
    #[serde(default)]
    assignee_id: i64,
}

#[tracing::instrument(skip_all, fields(owner = %owner, repo = %repo, compare = %compare))]
pub(crate) async fn create_pull_request(
    State(state): State<AppState>,
    Path((owner, repo, compare)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<CreatePullRequestBody>,
) -> ApiResult {
    let principal = auth::principal(state.store.as_ref(), &headers).await?;

    if body.title.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "title must not be empty" })),
        ));
    }

    let base_repo = base_repository(&state, &owner, &repo).await?;

    let req = CreatePullRequest {
        compare,
        title: body.title.trim().to_string(),
        body: body.body,
        labels: body.labels,
        milestone_id: body.milestone,
        assignee_id: body.assignee_id,
    };

    let outcome = state
        .pull_creator
        .create(&principal, &base_repo, &req)
        .await
        .map_err(|e| error_response(&e))?;

    match outcome {
        CreateOutcome::Created {
            issue_id,
            index,
            propagation_error,
            ..
        } => {
            let mut resp = json!({ "issue_id": issue_id, "index": index });
            if let Some(warning) = propagation_error {
                resp["warning"] = json!(format!(
                    "pull request created but its ref was not published: {warning}"
                ));
            }
            Ok((StatusCode::CREATED, Json(resp)))
        }
        CreateOutcome::Duplicate { issue_id, index } => Err((
            StatusCode::CONFLICT,
            Json(json!({
                "error": "an unmerged pull request already exists for these branches",
                "issue_id": issue_id,
                "index": index,
            })),
        )),
        CreateOutcome::NothingToCompare => Err((
            StatusCode::PRECONDITION_FAILED,
            Json(json!({ "error": "nothing to compare: head branch has no new commits" })),
        )),
    }
}

pub(crate) async fn list_pull_requests(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> ApiResult {
    let base_repo = base_repository(&state, &owner, &repo).await?;

    let pulls = state
        .store
        .list_pull_requests(base_repo.id)
        .await
        .map_err(|e| error_response(&PullError::StoreFailure(e)))?;

    let mut summaries = Vec::with_capacity(pulls.len());
    for pr in pulls {
        let title = state
            .store
            .get_issue(pr.issue_id)
            .await
            .map_err(|e| error_response(&PullError::StoreFailure(e)))?
            .map(|issue| issue.title)
            .unwrap_or_default();
        summaries.push(json!({
            "id": pr.id,
            "issue_id": pr.issue_id,
            "index": pr.index,
            "title": title,
            "head_repo_id": pr.head_repo_id,
            "head_user_name": pr.head_user_name,
            "head_branch": pr.head_branch,
            "base_branch": pr.base_branch,
            "merge_base": pr.merge_base,
            "kind": pr.kind,
            "status": pr.status,
            "has_merged": pr.has_merged,
            "created_at": pr.created_at,
        }));
    }

    Ok((StatusCode::OK, Json(json!({ "pull_requests": summaries }))))
}
