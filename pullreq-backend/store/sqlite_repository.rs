//! SQLite implementation of `MetadataStore`.
//!
//! One connection behind a mutex; every call runs on the blocking pool. The
//! partial unique index `idx_unmerged_pair` is what guarantees at most one
//! unmerged pull request per branch pair, regardless of how many requests race
//! past the duplicate check in the creator.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::repository::{CreateError, MetadataStore};
use super::{
    AccessMode, BranchPair, CreatedPullRequest, Issue, Label, Milestone, NewIssue,
    NewPullRequest, PullRequest, PullRequestKind, PullRequestStatus, Repository, User,
};

const CURRENT_SCHEMA_VERSION: i64 = 1;

const REPO_SELECT: &str = "SELECT r.id, r.owner_id, u.name, r.name, r.fork_id, r.num_pulls
     FROM repositories r JOIN users u ON u.id = r.owner_id";

const PULL_SELECT: &str = "SELECT id, issue_id, idx, head_repo_id, base_repo_id, head_user_name,
            head_branch, base_branch, merge_base, kind, status, has_merged, patch, created_at
     FROM pull_requests";

pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path`. `":memory:"` gives a private
    /// in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let in_memory = path.as_os_str() == ":memory:";

        if !in_memory {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create store directory: {}", parent.display())
                    })?;
                }
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open metadata store: {}", path.display()))?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("failed to set journal_mode")?;
        if !in_memory && !journal_mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(journal_mode = %journal_mode, "metadata store is not running in WAL mode");
        }

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .context("failed to configure pragmas")?;

        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| anyhow!("metadata store connection poisoned"))?;
            f(&mut conn).with_context(|| format!("metadata store: {op}"))
        })
        .await
        .with_context(|| format!("metadata store task failed: {op}"))?
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Stand-in for merge tooling, which lives outside this service.
    #[cfg(test)]
    pub async fn mark_merged(&self, pull_request_id: i64) -> Result<bool> {
        self.with_conn("mark merged", move |conn| {
            conn.execute(
                "UPDATE pull_requests SET has_merged = 1 WHERE id = ?1",
                params![pull_request_id],
            )
        })
        .await
        .map(|n| n > 0)
    }

    #[cfg(test)]
    pub async fn count_rows(&self, table: &'static str) -> Result<i64> {
        self.with_conn("count rows", move |conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        })
        .await
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );
        "#,
    )
    .context("failed to create schema_version table")?;

    let current: i64 = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()
        .context("failed to read schema version")?
        .unwrap_or(0);

    if current > CURRENT_SCHEMA_VERSION {
        anyhow::bail!(
            "metadata store schema version {current} is newer than supported version {CURRENT_SCHEMA_VERSION}"
        );
    }
    if current == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    if current < 1 {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                lower_name TEXT NOT NULL UNIQUE,
                is_admin INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL REFERENCES users(id),
                name TEXT NOT NULL,
                lower_name TEXT NOT NULL,
                fork_id INTEGER REFERENCES repositories(id),
                num_pulls INTEGER NOT NULL DEFAULT 0,
                UNIQUE (owner_id, lower_name)
            );
            CREATE INDEX IF NOT EXISTS idx_repo_fork ON repositories(fork_id, owner_id);

            CREATE TABLE IF NOT EXISTS collaborations (
                repo_id INTEGER NOT NULL REFERENCES repositories(id),
                user_id INTEGER NOT NULL REFERENCES users(id),
                mode TEXT NOT NULL CHECK (mode IN ('read', 'write', 'admin')),
                PRIMARY KEY (repo_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS labels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repo_id INTEGER NOT NULL REFERENCES repositories(id),
                name TEXT NOT NULL,
                color TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS milestones (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repo_id INTEGER NOT NULL REFERENCES repositories(id),
                name TEXT NOT NULL,
                is_closed INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS issues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repo_id INTEGER NOT NULL REFERENCES repositories(id),
                idx INTEGER NOT NULL,
                title TEXT NOT NULL,
                poster_id INTEGER NOT NULL REFERENCES users(id),
                milestone_id INTEGER REFERENCES milestones(id),
                assignee_id INTEGER REFERENCES users(id),
                is_pull INTEGER NOT NULL DEFAULT 0,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (repo_id, idx)
            );

            CREATE TABLE IF NOT EXISTS issue_labels (
                issue_id INTEGER NOT NULL REFERENCES issues(id),
                label_id INTEGER NOT NULL REFERENCES labels(id),
                PRIMARY KEY (issue_id, label_id)
            );

            CREATE TABLE IF NOT EXISTS pull_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                issue_id INTEGER NOT NULL UNIQUE REFERENCES issues(id),
                idx INTEGER NOT NULL,
                head_repo_id INTEGER NOT NULL,
                base_repo_id INTEGER NOT NULL REFERENCES repositories(id),
                head_user_name TEXT NOT NULL,
                head_branch TEXT NOT NULL,
                base_branch TEXT NOT NULL,
                merge_base TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                has_merged INTEGER NOT NULL DEFAULT 0,
                patch TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_unmerged_pair
                ON pull_requests(head_repo_id, base_repo_id, head_branch, base_branch)
                WHERE has_merged = 0;
            "#,
        )
        .context("migration v1")?;
    }

    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
        params![CURRENT_SCHEMA_VERSION],
    )
    .context("failed to update schema version")?;
    Ok(())
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        is_admin: row.get(2)?,
    })
}

fn repo_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        owner_name: row.get(2)?,
        name: row.get(3)?,
        fork_id: row.get(4)?,
        num_pulls: row.get(5)?,
    })
}

fn pull_from_row(row: &Row<'_>) -> rusqlite::Result<PullRequest> {
    let kind: String = row.get(9)?;
    let status: String = row.get(10)?;
    Ok(PullRequest {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        index: row.get(2)?,
        head_repo_id: row.get(3)?,
        base_repo_id: row.get(4)?,
        head_user_name: row.get(5)?,
        head_branch: row.get(6)?,
        base_branch: row.get(7)?,
        merge_base: row.get(8)?,
        kind: PullRequestKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                Type::Text,
                format!("unknown pull request kind: {kind}").into(),
            )
        })?,
        status: PullRequestStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                10,
                Type::Text,
                format!("unknown pull request status: {status}").into(),
            )
        })?,
        has_merged: row.get(11)?,
        patch: row.get(12)?,
        created_at: row.get(13)?,
    })
}

/// True when `err` is the open-pair unique index firing.
fn is_open_pair_conflict(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && msg
                    .as_deref()
                    .is_some_and(|m| m.contains("pull_requests.head_repo_id"))
        }
        _ => false,
    }
}

fn insert_pull_request(
    conn: &mut Connection,
    issue: &NewIssue,
    pull: &NewPullRequest,
) -> Result<CreatedPullRequest, CreateError> {
    // Dropping the transaction without commit rolls everything back.
    let tx = conn.transaction().context("failed to begin transaction")?;

    let index: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(idx), 0) + 1 FROM issues WHERE repo_id = ?1",
            params![issue.repo_id],
            |row| row.get(0),
        )
        .context("failed to compute next issue index")?;

    let now = Utc::now();
    tx.execute(
        "INSERT INTO issues (repo_id, idx, title, poster_id, milestone_id, assignee_id,
                             is_pull, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8)",
        params![
            issue.repo_id,
            index,
            issue.title,
            issue.poster_id,
            issue.milestone_id,
            issue.assignee_id,
            issue.content,
            now,
        ],
    )
    .context("failed to insert issue")?;
    let issue_id = tx.last_insert_rowid();

    for label_id in &issue.label_ids {
        tx.execute(
            "INSERT OR IGNORE INTO issue_labels (issue_id, label_id)
             SELECT ?1, id FROM labels WHERE id = ?2 AND repo_id = ?3",
            params![issue_id, label_id, issue.repo_id],
        )
        .context("failed to attach label")?;
    }

    let inserted = tx.execute(
        "INSERT INTO pull_requests (issue_id, idx, head_repo_id, base_repo_id, head_user_name,
                                    head_branch, base_branch, merge_base, kind, status,
                                    has_merged, patch, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12)",
        params![
            issue_id,
            index,
            pull.head_repo_id,
            pull.base_repo_id,
            pull.head_user_name,
            pull.head_branch,
            pull.base_branch,
            pull.merge_base,
            pull.kind.as_str(),
            PullRequestStatus::Checking.as_str(),
            pull.patch,
            now,
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_open_pair_conflict(&e) => {
            return Err(CreateError::Duplicate(pull.branch_pair()));
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context("failed to insert pull request")
                .into());
        }
    }
    let pull_request_id = tx.last_insert_rowid();

    tx.execute(
        "UPDATE repositories SET num_pulls = num_pulls + 1 WHERE id = ?1",
        params![pull.base_repo_id],
    )
    .context("failed to update pull request count")?;

    tx.commit().context("failed to commit pull request")?;

    Ok(CreatedPullRequest {
        issue_id,
        pull_request_id,
        index,
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
        let lower = name.to_lowercase();
        self.with_conn("get user by name", move |conn| {
            conn.query_row(
                "SELECT id, name, is_admin FROM users WHERE lower_name = ?1",
                params![lower],
                user_from_row,
            )
            .optional()
        })
        .await
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        let owner = owner.to_lowercase();
        let name = name.to_lowercase();
        self.with_conn("get repository", move |conn| {
            conn.query_row(
                &format!("{REPO_SELECT} WHERE u.lower_name = ?1 AND r.lower_name = ?2"),
                params![owner, name],
                repo_from_row,
            )
            .optional()
        })
        .await
    }

    async fn get_fork(&self, owner_id: i64, base_repo_id: i64) -> Result<Option<Repository>> {
        self.with_conn("get fork", move |conn| {
            conn.query_row(
                &format!("{REPO_SELECT} WHERE r.owner_id = ?1 AND r.fork_id = ?2"),
                params![owner_id, base_repo_id],
                repo_from_row,
            )
            .optional()
        })
        .await
    }

    async fn access_mode(&self, user_id: i64, repo_id: i64) -> Result<Option<AccessMode>> {
        let mode: Option<Option<String>> = self
            .with_conn("access mode", move |conn| {
                conn.query_row(
                    "SELECT CASE WHEN r.owner_id = ?1 THEN 'admin' ELSE c.mode END
                     FROM repositories r
                     LEFT JOIN collaborations c ON c.repo_id = r.id AND c.user_id = ?1
                     WHERE r.id = ?2",
                    params![user_id, repo_id],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        Ok(mode.flatten().as_deref().and_then(AccessMode::parse))
    }

    async fn labels(&self, repo_id: i64) -> Result<Vec<Label>> {
        self.with_conn("list labels", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, repo_id, name, color FROM labels WHERE repo_id = ?1 ORDER BY name",
            )?;
            let rows = stmt.query_map(params![repo_id], |row| {
                Ok(Label {
                    id: row.get(0)?,
                    repo_id: row.get(1)?,
                    name: row.get(2)?,
                    color: row.get(3)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn get_milestone(&self, repo_id: i64, milestone_id: i64) -> Result<Option<Milestone>> {
        self.with_conn("get milestone", move |conn| {
            conn.query_row(
                "SELECT id, repo_id, name, is_closed FROM milestones WHERE id = ?1 AND repo_id = ?2",
                params![milestone_id, repo_id],
                |row| {
                    Ok(Milestone {
                        id: row.get(0)?,
                        repo_id: row.get(1)?,
                        name: row.get(2)?,
                        is_closed: row.get(3)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn assignees(&self, repo_id: i64) -> Result<Vec<User>> {
        self.with_conn("list assignees", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.name, u.is_admin FROM users u
                 JOIN repositories r ON r.owner_id = u.id WHERE r.id = ?1
                 UNION
                 SELECT u.id, u.name, u.is_admin FROM users u
                 JOIN collaborations c ON c.user_id = u.id
                 WHERE c.repo_id = ?1 AND c.mode IN ('write', 'admin')
                 ORDER BY 2",
            )?;
            let rows = stmt.query_map(params![repo_id], user_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn get_issue(&self, issue_id: i64) -> Result<Option<Issue>> {
        self.with_conn("get issue", move |conn| {
            let issue = conn
                .query_row(
                    "SELECT id, repo_id, idx, title, poster_id, milestone_id, assignee_id,
                            is_pull, content, created_at
                     FROM issues WHERE id = ?1",
                    params![issue_id],
                    |row| {
                        Ok(Issue {
                            id: row.get(0)?,
                            repo_id: row.get(1)?,
                            index: row.get(2)?,
                            title: row.get(3)?,
                            poster_id: row.get(4)?,
                            milestone_id: row.get(5)?,
                            assignee_id: row.get(6)?,
                            is_pull: row.get(7)?,
                            content: row.get(8)?,
                            label_ids: Vec::new(),
                            created_at: row.get(9)?,
                        })
                    },
                )
                .optional()?;
            let Some(mut issue) = issue else {
                return Ok(None);
            };
            let mut stmt = conn.prepare(
                "SELECT label_id FROM issue_labels WHERE issue_id = ?1 ORDER BY label_id",
            )?;
            issue.label_ids = stmt
                .query_map(params![issue_id], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            Ok(Some(issue))
        })
        .await
    }

    async fn get_unmerged_pull_request(&self, pair: &BranchPair) -> Result<Option<PullRequest>> {
        let pair = pair.clone();
        self.with_conn("get unmerged pull request", move |conn| {
            conn.query_row(
                &format!(
                    "{PULL_SELECT} WHERE head_repo_id = ?1 AND base_repo_id = ?2
                       AND head_branch = ?3 AND base_branch = ?4 AND has_merged = 0"
                ),
                params![
                    pair.head_repo_id,
                    pair.base_repo_id,
                    pair.head_branch,
                    pair.base_branch
                ],
                pull_from_row,
            )
            .optional()
        })
        .await
    }

    async fn list_pull_requests(&self, base_repo_id: i64) -> Result<Vec<PullRequest>> {
        self.with_conn("list pull requests", move |conn| {
            let mut stmt =
                conn.prepare(&format!("{PULL_SELECT} WHERE base_repo_id = ?1 ORDER BY idx"))?;
            let rows = stmt.query_map(params![base_repo_id], pull_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn create_pull_request(
        &self,
        issue: NewIssue,
        pull: NewPullRequest,
    ) -> std::result::Result<CreatedPullRequest, CreateError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| anyhow!("metadata store connection poisoned"))?;
            insert_pull_request(&mut conn, &issue, &pull)
        })
        .await
        .context("metadata store task failed: create pull request")?
    }

    async fn create_user(&self, name: &str, is_admin: bool) -> Result<User> {
        let name = name.to_string();
        self.with_conn("create user", move |conn| {
            conn.execute(
                "INSERT INTO users (name, lower_name, is_admin) VALUES (?1, ?2, ?3)",
                params![name, name.to_lowercase(), is_admin],
            )?;
            Ok(User {
                id: conn.last_insert_rowid(),
                name,
                is_admin,
            })
        })
        .await
    }

    async fn create_repository(
        &self,
        owner_id: i64,
        name: &str,
        fork_id: Option<i64>,
    ) -> Result<Repository> {
        let name = name.to_string();
        self.with_conn("create repository", move |conn| {
            let owner_name: String = conn.query_row(
                "SELECT name FROM users WHERE id = ?1",
                params![owner_id],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO repositories (owner_id, name, lower_name, fork_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![owner_id, name, name.to_lowercase(), fork_id],
            )?;
            Ok(Repository {
                id: conn.last_insert_rowid(),
                owner_id,
                owner_name,
                name,
                fork_id,
                num_pulls: 0,
            })
        })
        .await
    }

    async fn set_collaborator(&self, repo_id: i64, user_id: i64, mode: AccessMode) -> Result<()> {
        self.with_conn("set collaborator", move |conn| {
            conn.execute(
                "INSERT INTO collaborations (repo_id, user_id, mode) VALUES (?1, ?2, ?3)
                 ON CONFLICT(repo_id, user_id) DO UPDATE SET mode = excluded.mode",
                params![repo_id, user_id, mode.as_str()],
            )
            .map(|_| ())
        })
        .await
    }

    async fn create_label(&self, repo_id: i64, name: &str, color: &str) -> Result<Label> {
        let name = name.to_string();
        let color = color.to_string();
        self.with_conn("create label", move |conn| {
            conn.execute(
                "INSERT INTO labels (repo_id, name, color) VALUES (?1, ?2, ?3)",
                params![repo_id, name, color],
            )?;
            Ok(Label {
                id: conn.last_insert_rowid(),
                repo_id,
                name,
                color,
            })
        })
        .await
    }

    async fn create_milestone(&self, repo_id: i64, name: &str) -> Result<Milestone> {
        let name = name.to_string();
        self.with_conn("create milestone", move |conn| {
            conn.execute(
                "INSERT INTO milestones (repo_id, name) VALUES (?1, ?2)",
                params![repo_id, name],
            )?;
            Ok(Milestone {
                id: conn.last_insert_rowid(),
                repo_id,
                name,
                is_closed: false,
            })
        })
        .await
    }
}
