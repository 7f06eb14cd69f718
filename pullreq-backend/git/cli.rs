use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use super::error::GitError;
use super::provider::{GitProvider, GitRepo, MergeInfo, RepoIdentity, pull_ref};

/// `GitProvider` backed by the `git` executable.
///
/// Repositories live at `<root>/<owner>/<name>.git`, both segments lower-cased.
pub struct CliGitProvider {
    root: PathBuf,
    git_bin: String,
}

impl CliGitProvider {
    pub fn new(root: impl Into<PathBuf>, git_bin: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            git_bin: git_bin.into(),
        }
    }

    pub fn repo_path(&self, repo: &RepoIdentity) -> PathBuf {
        self.root
            .join(repo.owner.to_lowercase())
            .join(format!("{}.git", repo.name.to_lowercase()))
    }

    async fn output(&self, dir: &Path, args: &[&str]) -> Result<Output, GitError> {
        let output = Command::new(&self.git_bin)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(dir, args).await?;
        if !output.status.success() {
            return Err(command_failed(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a command whose exit code is the answer.
    async fn run_check(&self, dir: &Path, args: &[&str]) -> Result<bool, GitError> {
        Ok(self.output(dir, args).await?.status.success())
    }

    async fn merge_base_in(
        &self,
        dir: &Path,
        base_rev: &str,
        head_rev: &str,
        base_branch: &str,
        head_branch: &str,
    ) -> Result<MergeInfo, GitError> {
        let args = ["merge-base", base_rev, head_rev];
        let output = self.output(dir, &args).await?;
        if !output.status.success() {
            // merge-base exits 1 with no output when the histories share no commit
            if output.status.code() == Some(1) && output.stdout.is_empty() {
                return Err(GitError::NoMergeBase {
                    base: base_branch.to_string(),
                    head: head_branch.to_string(),
                });
            }
            return Err(command_failed(&args, &output));
        }
        let merge_base = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let range = format!("{merge_base}..{head_rev}");
        let commits = self
            .run(dir, &["rev-list", &range])
            .await?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(MergeInfo {
            merge_base,
            commits,
        })
    }
}

fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{branch}")
}

fn command_failed(args: &[&str], output: &Output) -> GitError {
    GitError::CommandFailed {
        args: args.join(" "),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

#[async_trait]
impl GitProvider for CliGitProvider {
    async fn open(&self, repo: &RepoIdentity) -> Result<GitRepo, GitError> {
        let path = self.repo_path(repo);
        if !path.is_dir() || !self.run_check(&path, &["rev-parse", "--git-dir"]).await? {
            return Err(GitError::NotFound(repo.to_string()));
        }
        Ok(GitRepo {
            identity: repo.clone(),
            path,
        })
    }

    /// Exact ref lookup. Revision expressions such as `master~1` or
    /// `master@{0}` are not branches and report `false`.
    async fn branch_exists(&self, repo: &GitRepo, branch: &str) -> Result<bool, GitError> {
        self.run_check(
            &repo.path,
            &["show-ref", "--verify", "--quiet", &branch_ref(branch)],
        )
        .await
    }

    async fn branch_commit_id(&self, repo: &GitRepo, branch: &str) -> Result<String, GitError> {
        let output = self
            .output(
                &repo.path,
                &["show-ref", "--verify", "--hash", &branch_ref(branch)],
            )
            .await?;
        if !output.status.success() {
            return Err(GitError::BranchNotFound(branch.to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn merge_info(
        &self,
        base: &GitRepo,
        base_branch: &str,
        head: &GitRepo,
        head_branch: &str,
    ) -> Result<MergeInfo, GitError> {
        if base.path == head.path {
            return self
                .merge_base_in(
                    &head.path,
                    &branch_ref(base_branch),
                    &branch_ref(head_branch),
                    base_branch,
                    head_branch,
                )
                .await;
        }

        // Bring the base branch into the head store under a ref no other request uses.
        let tmp_ref = format!("refs/pullreq-tmp/{}", Uuid::new_v4());
        let base_path = base.path.to_string_lossy();
        let refspec = format!("+{}:{tmp_ref}", branch_ref(base_branch));
        self.run(
            &head.path,
            &["fetch", "--no-tags", "--quiet", &base_path, &refspec],
        )
        .await?;

        let result = self
            .merge_base_in(
                &head.path,
                &tmp_ref,
                &branch_ref(head_branch),
                base_branch,
                head_branch,
            )
            .await;

        if let Err(e) = self.run(&head.path, &["update-ref", "-d", &tmp_ref]).await {
            tracing::warn!(repo = %head.identity, tmp_ref = %tmp_ref, error = %e, "failed to delete temporary ref");
        }
        result
    }

    async fn patch(
        &self,
        repo: &GitRepo,
        from_commit: &str,
        to_branch: &str,
    ) -> Result<String, GitError> {
        self.run(
            &repo.path,
            &["diff", "-p", "--binary", from_commit, &branch_ref(to_branch), "--"],
        )
        .await
    }

    async fn push_pull_ref(
        &self,
        head: &GitRepo,
        head_branch: &str,
        base: &GitRepo,
        index: i64,
    ) -> Result<(), GitError> {
        let target = pull_ref(index);
        if base.path == head.path {
            let commit = self.branch_commit_id(head, head_branch).await?;
            self.run(&head.path, &["update-ref", &target, &commit]).await?;
            return Ok(());
        }

        let base_path = base.path.to_string_lossy();
        let refspec = format!("{}:{target}", branch_ref(head_branch));
        self.run(
            &head.path,
            &["push", "--quiet", "--force", &base_path, &refspec],
        )
        .await?;
        Ok(())
    }
}
