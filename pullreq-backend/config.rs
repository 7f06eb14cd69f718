use std::path::PathBuf;

/// Server configuration loaded from environment variables.
pub struct Config {
    pub port: u16,
    pub sentry_dsn: Option<String>,
    pub environment: String,
    /// Holds `pullreq.db`.
    pub data_dir: PathBuf,
    /// Bare repositories live at `<repos_root>/<owner>/<name>.git`.
    pub repos_root: PathBuf,
    pub git_bin: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_raw_values(
            std::env::var("PORT").ok().as_deref(),
            std::env::var("SENTRY_DSN").ok().as_deref(),
            std::env::var("ENVIRONMENT").ok().as_deref(),
            std::env::var("PULLREQ_DATA_DIR").ok().as_deref(),
            std::env::var("PULLREQ_REPOS_ROOT").ok().as_deref(),
            std::env::var("GIT_BIN").ok().as_deref(),
        )
    }

    /// Build a Config from raw string values (as they would come from env vars).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_raw_values(
        port: Option<&str>,
        sentry_dsn: Option<&str>,
        environment: Option<&str>,
        data_dir: Option<&str>,
        repos_root: Option<&str>,
        git_bin: Option<&str>,
    ) -> Self {
        let port = port.and_then(|v| v.parse().ok()).unwrap_or(8081);

        let sentry_dsn = sentry_dsn.filter(|s| !s.is_empty()).map(String::from);

        let environment = environment
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| "local".to_string());

        let data_dir = data_dir
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".pullreq")
            });

        let repos_root = repos_root
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("repositories"));

        let git_bin = git_bin
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| "git".to_string());

        Config {
            port,
            sentry_dsn,
            environment,
            data_dir,
            repos_root,
            git_bin,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("pullreq.db")
    }
}
