mod api;
mod config;
mod git;
mod pulls;
mod seed;
mod store;

use anyhow::Context;
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::git::cli::CliGitProvider;
use crate::git::provider::GitProvider;
use crate::pulls::creator::PullRequestCreator;
use crate::store::repository::MetadataStore;
use crate::store::sqlite_repository::SqliteMetadataStore;

#[derive(Parser)]
#[command(name = "pullreq", about = "Cross-repository pull request service")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve,
    /// Load users, repositories, forks, labels and milestones from a YAML file
    Seed {
        /// Path to the seed file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    // Default to Serve when no subcommand is given, but still allow --help and --version.
    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 {
        Cli::Serve
    } else {
        Cli::parse()
    };

    let config = config::Config::from_env();
    init_tracing();

    match cli {
        Cli::Serve => run_server(config).await,
        Cli::Seed { file } => run_seed(config, file).await,
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pullreq=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(false),
        )
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();
}

fn open_store(config: &config::Config) -> anyhow::Result<Arc<SqliteMetadataStore>> {
    let path = config.database_path();
    let store = SqliteMetadataStore::open(&path)
        .with_context(|| format!("failed to open store at {}", path.display()))?;
    tracing::info!(path = %path.display(), "metadata store opened");
    Ok(Arc::new(store))
}

async fn run_seed(config: config::Config, file: PathBuf) -> Result<(), Box<dyn Error>> {
    let store = open_store(&config)?;
    let seed = seed::load(&file)?;
    let summary = seed::apply(store.as_ref(), &seed).await?;
    tracing::info!(
        users = summary.users,
        repositories = summary.repositories,
        labels = summary.labels,
        milestones = summary.milestones,
        "seed applied"
    );
    Ok(())
}

async fn run_server(config: config::Config) -> Result<(), Box<dyn Error>> {
    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: true,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    let store: Arc<dyn MetadataStore> = open_store(&config)?;

    std::fs::create_dir_all(&config.repos_root).with_context(|| {
        format!(
            "failed to create repositories root: {}",
            config.repos_root.display()
        )
    })?;
    let git: Arc<dyn GitProvider> = Arc::new(CliGitProvider::new(
        config.repos_root.clone(),
        config.git_bin.clone(),
    ));
    tracing::info!(repos_root = %config.repos_root.display(), git_bin = %config.git_bin, "git provider ready");

    let app_state = api::AppState {
        store: store.clone(),
        pull_creator: Arc::new(PullRequestCreator::new(store, git)),
    };

    let app = api::create_app(app_state)
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let port = config.port;
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    println!("Listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
