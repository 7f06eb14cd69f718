//! Load users, repositories, forks, collaborators, labels and milestones from YAML.
//!
//! ```yaml
//! users:
//!   - name: alice
//!   - name: root
//!     admin: true
//! repositories:
//!   - owner: alice
//!     name: widgets
//!     collaborators:
//!       - { user: bob, mode: write }
//!     labels:
//!       - { name: bug, color: "#ee0701" }
//!     milestones: [v1.0]
//!   - owner: bob
//!     name: widgets
//!     fork_of: alice/widgets
//! ```
//!
//! Repositories are created in file order, so a fork must come after its parent.
//! Users and repositories that already exist are left alone.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::store::AccessMode;
use crate::store::repository::MetadataStore;

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub repositories: Vec<SeedRepository>,
}

#[derive(Debug, Deserialize)]
pub struct SeedUser {
    pub name: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct SeedRepository {
    pub owner: String,
    pub name: String,
    /// `owner/name` of the parent repository.
    #[serde(default)]
    pub fork_of: Option<String>,
    #[serde(default)]
    pub collaborators: Vec<SeedCollaborator>,
    #[serde(default)]
    pub labels: Vec<SeedLabel>,
    #[serde(default)]
    pub milestones: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedCollaborator {
    pub user: String,
    pub mode: AccessMode,
}

#[derive(Debug, Deserialize)]
pub struct SeedLabel {
    pub name: String,
    #[serde(default = "default_label_color")]
    pub color: String,
}

fn default_label_color() -> String {
    "#ededed".to_string()
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub users: usize,
    pub repositories: usize,
    pub labels: usize,
    pub milestones: usize,
}

pub fn load(path: &Path) -> Result<SeedFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file: {}", path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse seed file: {}", path.display()))
}

pub async fn apply(store: &dyn MetadataStore, seed: &SeedFile) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for user in &seed.users {
        if store.get_user_by_name(&user.name).await?.is_some() {
            tracing::info!(user = %user.name, "user exists, skipping");
            continue;
        }
        store.create_user(&user.name, user.admin).await?;
        summary.users += 1;
    }

    for repo in &seed.repositories {
        if store.get_repository(&repo.owner, &repo.name).await?.is_some() {
            tracing::info!(owner = %repo.owner, name = %repo.name, "repository exists, skipping");
            continue;
        }
        let owner = store
            .get_user_by_name(&repo.owner)
            .await?
            .with_context(|| format!("unknown owner {} for {}", repo.owner, repo.name))?;

        let fork_id = match &repo.fork_of {
            None => None,
            Some(parent) => {
                let Some((parent_owner, parent_name)) = parent.split_once('/') else {
                    bail!("fork_of must be owner/name, got {parent:?}");
                };
                let parent = store
                    .get_repository(parent_owner, parent_name)
                    .await?
                    .with_context(|| format!("unknown parent repository {parent}"))?;
                Some(parent.id)
            }
        };

        let created = store.create_repository(owner.id, &repo.name, fork_id).await?;
        summary.repositories += 1;

        for collaborator in &repo.collaborators {
            let user = store
                .get_user_by_name(&collaborator.user)
                .await?
                .with_context(|| format!("unknown collaborator {}", collaborator.user))?;
            store
                .set_collaborator(created.id, user.id, collaborator.mode)
                .await?;
        }
        for label in &repo.labels {
            store.create_label(created.id, &label.name, &label.color).await?;
            summary.labels += 1;
        }
        for milestone in &repo.milestones {
            store.create_milestone(created.id, milestone).await?;
            summary.milestones += 1;
        }
    }

    Ok(summary)
}
