//! Throwaway on-disk repositories for tests that drive the real `git` binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn raw(dir: &Path, args: &[&str]) -> Output {
    Command::new("git")
        .args([
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "init.defaultBranch=master",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git should run")
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = raw(dir, args);
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// True when `sha` is present in the object store at `dir`.
pub fn has_object(dir: &Path, sha: &str) -> bool {
    raw(dir, &["cat-file", "-e", sha]).status.success()
}

pub fn commit_file(dir: &Path, name: &str, content: &str, message: &str) -> String {
    std::fs::write(dir.join(name), content).unwrap();
    git(dir, &["add", name]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

/// alice/widgets with one commit on master, bob/widgets cloned from it.
pub fn fixture(root: &Path) -> (PathBuf, PathBuf) {
    let base = root.join("alice").join("widgets.git");
    std::fs::create_dir_all(&base).unwrap();
    git(&base, &["init", "-q"]);
    git(&base, &["symbolic-ref", "HEAD", "refs/heads/master"]);
    commit_file(&base, "README.md", "widgets\n", "initial");

    let fork = root.join("bob").join("widgets.git");
    std::fs::create_dir_all(fork.parent().unwrap()).unwrap();
    git(
        root,
        &["clone", "-q", base.to_str().unwrap(), fork.to_str().unwrap()],
    );
    (base, fork)
}
