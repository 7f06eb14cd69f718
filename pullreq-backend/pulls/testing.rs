//! In-memory git double and a shared fixture for the pull request tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::git::error::GitError;
use crate::git::provider::{GitProvider, GitRepo, MergeInfo, RepoIdentity};
use crate::store::repository::MetadataStore;
use crate::store::sqlite_repository::SqliteMetadataStore;
use crate::store::{AccessMode, Label, Milestone, Repository, User};

fn key(owner: &str, name: &str) -> (String, String) {
    (owner.to_lowercase(), name.to_lowercase())
}

#[derive(Default)]
struct FakeState {
    /// (owner, repo) -> branch -> commits from root to tip.
    repos: HashMap<(String, String), HashMap<String, Vec<String>>>,
    unavailable: HashSet<(String, String)>,
    fail_patch: bool,
    fail_push: bool,
    pushed: Vec<(String, String, i64)>,
    merge_info_calls: usize,
}

/// Branches are linear histories; the merge base is the last shared commit.
#[derive(Default)]
pub struct FakeGit {
    state: Mutex<FakeState>,
}

impl FakeGit {
    pub fn set_branch(&self, owner: &str, repo: &str, branch: &str, commits: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .repos
            .entry(key(owner, repo))
            .or_default()
            .insert(
                branch.to_string(),
                commits.iter().map(|c| c.to_string()).collect(),
            );
    }

    pub fn mark_unavailable(&self, owner: &str, repo: &str) {
        self.state.lock().unwrap().unavailable.insert(key(owner, repo));
    }

    pub fn fail_patch(&self) {
        self.state.lock().unwrap().fail_patch = true;
    }

    pub fn fail_push(&self) {
        self.state.lock().unwrap().fail_push = true;
    }

    /// (base repo, head branch, index) for every successful push.
    pub fn pushed(&self) -> Vec<(String, String, i64)> {
        self.state.lock().unwrap().pushed.clone()
    }

    pub fn merge_info_calls(&self) -> usize {
        self.state.lock().unwrap().merge_info_calls
    }

    fn history(&self, repo: &GitRepo, branch: &str) -> Result<Vec<String>, GitError> {
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(&key(&repo.identity.owner, &repo.identity.name))
            .and_then(|branches| branches.get(branch))
            .cloned()
            .ok_or_else(|| GitError::BranchNotFound(branch.to_string()))
    }
}

#[async_trait]
impl GitProvider for FakeGit {
    async fn open(&self, repo: &RepoIdentity) -> Result<GitRepo, GitError> {
        let state = self.state.lock().unwrap();
        let k = key(&repo.owner, &repo.name);
        if state.unavailable.contains(&k) || !state.repos.contains_key(&k) {
            return Err(GitError::NotFound(repo.to_string()));
        }
        Ok(GitRepo {
            identity: repo.clone(),
            path: PathBuf::from(format!("/fake/{}/{}.git", k.0, k.1)),
        })
    }

    async fn branch_exists(&self, repo: &GitRepo, branch: &str) -> Result<bool, GitError> {
        Ok(self.history(repo, branch).is_ok())
    }

    async fn branch_commit_id(&self, repo: &GitRepo, branch: &str) -> Result<String, GitError> {
        let history = self.history(repo, branch)?;
        history
            .last()
            .cloned()
            .ok_or_else(|| GitError::BranchNotFound(branch.to_string()))
    }

    async fn merge_info(
        &self,
        base: &GitRepo,
        base_branch: &str,
        head: &GitRepo,
        head_branch: &str,
    ) -> Result<MergeInfo, GitError> {
        self.state.lock().unwrap().merge_info_calls += 1;
        let base_history = self.history(base, base_branch)?;
        let head_history = self.history(head, head_branch)?;
        let shared = base_history
            .iter()
            .zip(&head_history)
            .take_while(|(a, b)| a == b)
            .count();
        if shared == 0 {
            return Err(GitError::NoMergeBase {
                base: base_branch.to_string(),
                head: head_branch.to_string(),
            });
        }
        Ok(MergeInfo {
            merge_base: head_history[shared - 1].clone(),
            commits: head_history[shared..].iter().rev().cloned().collect(),
        })
    }

    async fn patch(
        &self,
        repo: &GitRepo,
        from_commit: &str,
        to_branch: &str,
    ) -> Result<String, GitError> {
        if self.state.lock().unwrap().fail_patch {
            return Err(GitError::CommandFailed {
                args: "diff".into(),
                code: Some(128),
                stderr: "fatal: bad object".into(),
            });
        }
        let tip = self.branch_commit_id(repo, to_branch).await?;
        Ok(format!(
            "diff --git a/{to_branch} b/{to_branch}\n--- {from_commit}\n+++ {tip}\n"
        ))
    }

    async fn push_pull_ref(
        &self,
        _head: &GitRepo,
        head_branch: &str,
        base: &GitRepo,
        index: i64,
    ) -> Result<(), GitError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_push {
            return Err(GitError::CommandFailed {
                args: "push".into(),
                code: Some(1),
                stderr: "remote rejected".into(),
            });
        }
        state
            .pushed
            .push((base.identity.to_string(), head_branch.to_string(), index));
        Ok(())
    }
}

/// alice owns alice/widgets. bob (write collaborator) and carol (no access)
/// each own a fork; dave has read access and no fork; root is a site admin.
pub struct World {
    pub store: Arc<SqliteMetadataStore>,
    pub git: Arc<FakeGit>,
    pub alice: User,
    pub bob: User,
    pub carol: User,
    pub dave: User,
    pub root: User,
    pub base: Repository,
    pub fork: Repository,
    pub carol_fork: Repository,
    pub bug: Label,
    pub docs: Label,
    pub milestone: Milestone,
}

pub async fn world() -> World {
    let store = Arc::new(SqliteMetadataStore::open_in_memory().unwrap());
    let alice = store.create_user("alice", false).await.unwrap();
    let bob = store.create_user("bob", false).await.unwrap();
    let carol = store.create_user("carol", false).await.unwrap();
    let dave = store.create_user("dave", false).await.unwrap();
    let root = store.create_user("root", true).await.unwrap();

    let base = store.create_repository(alice.id, "widgets", None).await.unwrap();
    let fork = store
        .create_repository(bob.id, "widgets", Some(base.id))
        .await
        .unwrap();
    let carol_fork = store
        .create_repository(carol.id, "widgets", Some(base.id))
        .await
        .unwrap();
    store
        .set_collaborator(base.id, bob.id, AccessMode::Write)
        .await
        .unwrap();
    store
        .set_collaborator(base.id, dave.id, AccessMode::Read)
        .await
        .unwrap();

    let bug = store.create_label(base.id, "bug", "#ee0701").await.unwrap();
    let docs = store.create_label(base.id, "docs", "#0075ca").await.unwrap();
    store.create_label(fork.id, "fork-only", "#000000").await.unwrap();
    let milestone = store.create_milestone(base.id, "v1.0").await.unwrap();

    let git = Arc::new(FakeGit::default());
    git.set_branch("alice", "widgets", "master", &["c1", "c2"]);
    git.set_branch("alice", "widgets", "topic", &["c1", "c2", "t1"]);
    git.set_branch("alice", "widgets", "lonely", &["z1"]);
    git.set_branch("bob", "widgets", "master", &["c1"]);
    git.set_branch("bob", "widgets", "feature", &["c1", "f1"]);
    git.set_branch("bob", "widgets", "behind", &["c1"]);
    git.set_branch("carol", "widgets", "feature", &["c1", "x1"]);

    World {
        store,
        git,
        alice,
        bob,
        carol,
        dave,
        root,
        base,
        fork,
        carol_fork,
        bug,
        docs,
        milestone,
    }
}
