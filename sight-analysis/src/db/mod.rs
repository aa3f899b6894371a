//! Database access for sight-analysis
//!
//! The job store owns the analysis_jobs table. Users, surveys, questions
//! and responses are owned by the CRUD services; this service only reads
//! them, except for the ingestion seam in `responses` which records a
//! scored response and its trust adjustment.

pub mod jobs;
pub mod responses;
pub mod surveys;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            trust_score REAL NOT NULL DEFAULT 50.0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS surveys (
            survey_id TEXT PRIMARY KEY,
            creator_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            reward_points INTEGER NOT NULL DEFAULT 0,
            estimated_minutes INTEGER NOT NULL DEFAULT 0,
            draft TEXT NOT NULL DEFAULT 'unpublished',
            is_correlation_friendly INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS questions (
            question_id TEXT PRIMARY KEY,
            survey_id TEXT NOT NULL,
            ord INTEGER NOT NULL,
            text TEXT NOT NULL,
            question_type TEXT NOT NULL,
            options TEXT NOT NULL DEFAULT '[]',
            is_required INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS responses (
            response_id TEXT PRIMARY KEY,
            survey_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            answers TEXT NOT NULL DEFAULT '[]',
            is_flagged_spam INTEGER NOT NULL DEFAULT 0,
            trust_impact REAL NOT NULL DEFAULT 0.0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_responses_survey_submitted
         ON responses(survey_id, submitted_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_jobs (
            job_id TEXT PRIMARY KEY,
            survey_id TEXT NOT NULL,
            requester_id TEXT NOT NULL,
            state TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            completed_at TEXT,
            result TEXT,
            error TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            snapshot_as_of TEXT,
            eligible_count INTEGER,
            excluded_count INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_requester_submitted
         ON analysis_jobs(requester_id, submitted_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");

    Ok(())
}
