//! sight-analysis - Survey Analysis Microservice
//!
//! Accepts analysis job submissions over HTTP, runs them against the
//! external analysis capability with a bounded worker pool, and serves
//! status polling. Survey/response CRUD and user auth live in their own
//! services; this binary only reads their tables.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sight_analysis::config::AnalysisConfig;
use sight_analysis::provider::HttpAnalysisProvider;
use sight_analysis::worker::JobScheduler;
use sight_analysis::AppState;

#[derive(Debug, Parser)]
#[command(name = "sight-analysis", about = "Sight survey analysis service")]
struct Args {
    /// Config file path (default: ~/.config/sight/sight-analysis.toml)
    #[arg(long, env = "SIGHT_ANALYSIS_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address override
    #[arg(long)]
    bind: Option<String>,

    /// Database path override
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting sight-analysis microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    // CLI > ENV > TOML > default
    let mut config = AnalysisConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    config.validate()?;
    let config = Arc::new(config);

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = sight_analysis::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    let provider = Arc::new(HttpAnalysisProvider::new(&config.provider));
    let scheduler = JobScheduler::start(db_pool.clone(), provider, config.clone());

    // Jobs left over from a previous run: fail orphaned running jobs,
    // re-enqueue pending ones.
    let recovered = scheduler.recover_stale_jobs().await?;
    if recovered > 0 {
        info!(count = recovered, "Recovered stale jobs from previous run");
    }

    let state = AppState::new(db_pool, scheduler, config.clone());
    let app = sight_analysis::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
