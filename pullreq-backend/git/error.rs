use std::io;

/// Errors from git operations.
///
/// Providers map their internal failures into these variants. `NoMergeBase`
/// and `BranchNotFound` are kept apart from `CommandFailed` so callers can
/// report them as client-input problems instead of server faults.
#[derive(thiserror::Error, Debug)]
pub enum GitError {
    #[error("repository not found: {0}")]
    NotFound(String),

    #[error("branch not found: {0}")]
    BranchNotFound(String),

    #[error("no merge base between {base} and {head}")]
    NoMergeBase { base: String, head: String },

    #[error("git {args} failed: code={code:?}, stderr={stderr}")]
    CommandFailed {
        args: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_merge_base_names_both_sides() {
        let err = GitError::NoMergeBase {
            base: "master".into(),
            head: "feature".into(),
        };
        assert_eq!(err.to_string(), "no merge base between master and feature");
    }

    #[test]
    fn command_failed_displays_args_code_and_stderr() {
        let err = GitError::CommandFailed {
            args: "rev-parse --verify refs/heads/x".into(),
            code: Some(128),
            stderr: "fatal: bad revision".into(),
        };
        assert_eq!(
            err.to_string(),
            "git rev-parse --verify refs/heads/x failed: code=Some(128), stderr=fatal: bad revision"
        );
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "git: not found");
        let err: GitError = io_err.into();
        assert!(matches!(err, GitError::Io(_)));
        assert!(err.to_string().contains("git: not found"));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GitError>();
    }
}
