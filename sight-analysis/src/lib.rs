//! sight-analysis library interface
//!
//! Exposes the public APIs for integration testing.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod models;
pub mod provider;
pub mod scoring;
pub mod worker;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::AnalysisConfig;
use crate::worker::JobScheduler;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Job submission handle
    pub scheduler: JobScheduler,
    /// Service configuration
    pub config: Arc<AnalysisConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, scheduler: JobScheduler, config: Arc<AnalysisConfig>) -> Self {
        Self {
            db,
            scheduler,
            config,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::analysis_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
