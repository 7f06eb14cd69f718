use hyper::StatusCode;

use crate::git::error::GitError;

/// Every way a pull request creation can fail.
///
/// Compare resolution failures are client input problems and all map to 400.
/// "Nothing to compare" and "already exists" are not here: they are outcomes,
/// see `CreateOutcome`.
#[derive(thiserror::Error, Debug)]
pub enum PullError {
    #[error("malformed compare specification: {0}")]
    MalformedSpec(String),

    #[error("user not found: {0}")]
    UnknownUser(String),

    #[error("branch {branch} does not exist in {repo}")]
    UnknownBranch { repo: String, branch: String },

    #[error("{owner} has no fork of {base}")]
    NoForkRelationship { owner: String, base: String },

    #[error("repository unavailable: {repo}: {source}")]
    RepositoryUnavailable {
        repo: String,
        #[source]
        source: GitError,
    },

    #[error("no merge base between {base} and {head}")]
    NoMergeBase { base: String, head: String },

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("metadata store failure: {0:#}")]
    StoreFailure(anyhow::Error),

    #[error("git provider failure: {0}")]
    ProviderFailure(#[source] GitError),
}

impl PullError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PullError::MalformedSpec(_)
            | PullError::UnknownUser(_)
            | PullError::UnknownBranch { .. }
            | PullError::NoForkRelationship { .. }
            | PullError::RepositoryUnavailable { .. }
            | PullError::NoMergeBase { .. } => StatusCode::BAD_REQUEST,
            PullError::RepositoryNotFound(_) => StatusCode::NOT_FOUND,
            PullError::Forbidden(_) => StatusCode::FORBIDDEN,
            PullError::ValidationFailed(_) => StatusCode::PRECONDITION_FAILED,
            PullError::StoreFailure(_) | PullError::ProviderFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Server-side faults get logged at error level; the rest are the caller's problem.
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}
