//! History Viewer - streaming revision log and blame server for a git repository
//!
//! # Usage
//! ```bash
//! history-viewer /path/to/repository                 # Start server on port 3001
//! history-viewer . --branch main --path src/         # Default log filter
//! history-viewer . --concurrency 8 --load-timeout-secs 60
//! ```

mod config;
mod error;
mod git;
mod models;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::CoreConfig;
use error::AppError;
use git::{CacheRegistry, GitCli, GitRepository, SessionRegistry};
use models::LogQuery;
use routes::AppState;

/// History Viewer - Browse a repository's log and blame in your browser
#[derive(Parser)]
#[command(name = "history-viewer")]
#[command(about = "Streaming revision log and blame server", long_about = None)]
struct Cli {
    /// Path to the git repository to view
    #[arg(value_name = "REPO_PATH", default_value = ".")]
    repo_path: PathBuf,

    /// Port to run the server on
    #[arg(short, long, default_value = "3001")]
    port: u16,

    /// Branch listed when a log request does not name one
    #[arg(short, long)]
    branch: Option<String>,

    /// Restrict logs to revisions touching this path by default
    #[arg(long)]
    path: Option<String>,

    /// Concurrent `git show` processes per prefetcher (defaults to CPU count)
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Give up on a single revision load after this many seconds (0 = never)
    #[arg(long, default_value = "30")]
    load_timeout_secs: u64,

    /// Close log and blame sessions after this many seconds without a subscriber
    #[arg(long, default_value = "30")]
    session_idle_secs: u64,

    /// git executable to run
    #[arg(long, default_value = "git")]
    git: PathBuf,
}

impl Cli {
    fn core_config(&self) -> CoreConfig {
        let defaults = CoreConfig::default();
        CoreConfig {
            prefetch_concurrency: self.concurrency.unwrap_or(defaults.prefetch_concurrency).max(1),
            load_timeout: (self.load_timeout_secs > 0)
                .then(|| Duration::from_secs(self.load_timeout_secs)),
            session_idle_timeout: Duration::from_secs(self.session_idle_secs),
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing (quieter for production)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let repo = GitRepository::open(&cli.repo_path)
        .with_context(|| format!("Failed to open repository at {}", cli.repo_path.display()))?;
    let repo_path = repo.path.clone();
    let config = cli.core_config();
    tracing::info!(
        "Serving {} (concurrency {}, load timeout {:?})",
        repo_path.display(),
        config.prefetch_concurrency,
        config.load_timeout
    );

    let source = Arc::new(GitCli::new(&cli.git));
    let state = AppState {
        repo: Arc::new(repo),
        caches: Arc::new(CacheRegistry::new(source, config.load_timeout)),
        sessions: SessionRegistry::new("log session", config.session_idle_timeout, AppError::SessionNotFound),
        blames: SessionRegistry::new("blame session", config.session_idle_timeout, AppError::BlameNotFound),
        config: Arc::new(config),
        default_query: LogQuery {
            branch: cli.branch.clone(),
            path: cli.path.clone(),
        },
    };

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::create_router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("127.0.0.1:{}", cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to port {} (try --port <PORT>)", cli.port))?;

    println!();
    println!("  Repository: {}", repo_path.display());
    println!("  Server:     http://{}", addr);
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
        println!("\n  Shutting down...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
