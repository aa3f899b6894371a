//! Shared test fixtures for sight-analysis integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use sight_analysis::config::AnalysisConfig;
use sight_analysis::db;
use sight_analysis::models::JobState;
use sight_analysis::provider::{AnalysisCorpus, AnalysisProvider, Finding, Insight, ProviderError};

/// In-memory pool with the full schema.
///
/// Capped at one connection: every pooled connection to `sqlite::memory:`
/// would otherwise get its own empty database.
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_tables(&pool).await.unwrap();
    pool
}

/// Config tuned for fast tests: short backoff, 1s provider timeout
pub fn test_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.jwt_secret = "test-secret".to_string();
    config.scheduler.worker_count = 2;
    config.scheduler.max_attempts = 3;
    config.scheduler.backoff_initial_ms = 10;
    config.scheduler.backoff_cap_ms = 40;
    config.provider.timeout_secs = 1;
    config.filter.min_sample_size = 5;
    config.filter.trust_floor = 30.0;
    config
}

pub async fn seed_user(pool: &SqlitePool, trust_score: f64) -> Uuid {
    let user_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (user_id, full_name, email, trust_score) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(format!("User {}", &user_id.to_string()[..8]))
    .bind(format!("{}@sight.local", &user_id.to_string()[..8]))
    .bind(trust_score)
    .execute(pool)
    .await
    .unwrap();
    user_id
}

pub async fn seed_survey(pool: &SqlitePool, published: bool) -> Uuid {
    let survey_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO surveys (survey_id, creator_id, title, description, draft) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(survey_id.to_string())
    .bind(Uuid::new_v4().to_string())
    .bind("Lifestyle & Daily Energy")
    .bind("Sleep, screen time, caffeine, activity")
    .bind(if published { "published" } else { "unpublished" })
    .execute(pool)
    .await
    .unwrap();
    survey_id
}

pub async fn seed_questions(pool: &SqlitePool, survey_id: Uuid, count: usize) -> Vec<Uuid> {
    let mut ids = Vec::with_capacity(count);
    for order in 1..=count {
        let question_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO questions (question_id, survey_id, ord, text, question_type, options, is_required) \
             VALUES (?, ?, ?, ?, 'text', '[]', 1)",
        )
        .bind(question_id.to_string())
        .bind(survey_id.to_string())
        .bind(order as i64)
        .bind(format!("Question {}", order))
        .execute(pool)
        .await
        .unwrap();
        ids.push(question_id);
    }
    ids
}

/// Insert a response row directly, with the scorer's verdict pre-applied
pub async fn seed_response(
    pool: &SqlitePool,
    survey_id: Uuid,
    user_id: Uuid,
    question_ids: &[Uuid],
    submitted_at: DateTime<Utc>,
    is_spam: bool,
) -> Uuid {
    let response_id = Uuid::new_v4();
    let answers: Vec<serde_json::Value> = question_ids
        .iter()
        .enumerate()
        .map(|(i, q)| {
            serde_json::json!({
                "question_id": q,
                "value": if is_spam { "idk".to_string() } else { format!("Answer {}", i) },
            })
        })
        .collect();

    let started_at = submitted_at - ChronoDuration::minutes(4);
    sqlx::query(
        "INSERT INTO responses (response_id, survey_id, user_id, started_at, submitted_at, \
         duration_ms, answers, is_flagged_spam, trust_impact) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(response_id.to_string())
    .bind(survey_id.to_string())
    .bind(user_id.to_string())
    .bind(started_at.to_rfc3339())
    .bind(submitted_at.to_rfc3339())
    .bind(240_000_i64)
    .bind(serde_json::to_string(&answers).unwrap())
    .bind(is_spam as i64)
    .bind(if is_spam { -0.7 } else { 0.05 })
    .execute(pool)
    .await
    .unwrap();
    response_id
}

/// Seed `count` eligible responses from distinct trusted users
pub async fn seed_eligible_responses(
    pool: &SqlitePool,
    survey_id: Uuid,
    question_ids: &[Uuid],
    count: usize,
    submitted_at: DateTime<Utc>,
) {
    for _ in 0..count {
        let user_id = seed_user(pool, 60.0).await;
        seed_response(pool, survey_id, user_id, question_ids, submitted_at, false).await;
    }
}

pub fn test_insight(summary: &str) -> Insight {
    Insight {
        summary: summary.to_string(),
        findings: vec![Finding {
            title: "Sleep vs energy".to_string(),
            detail: "Respondents sleeping 7+ hours report higher energy".to_string(),
            strength: 0.8,
        }],
    }
}

/// Provider that fails the first `fail_times` calls, then succeeds
pub struct ScriptedProvider {
    pub fail_times: u32,
    pub calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn failing(fail_times: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_times,
            calls: AtomicU32::new(0),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedProvider {
    async fn analyze(&self, _corpus: &AnalysisCorpus) -> Result<Insight, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_times {
            Err(ProviderError::Status {
                status: 503,
                detail: format!("upstream unavailable (call {})", call),
            })
        } else {
            Ok(test_insight(&format!("insight from call {}", call)))
        }
    }
}

/// Provider that never responds within any reasonable timeout
pub struct HangingProvider {
    pub calls: AtomicU32,
}

impl HangingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for HangingProvider {
    async fn analyze(&self, _corpus: &AnalysisCorpus) -> Result<Insight, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!("provider call should have timed out")
    }
}

/// Poll until the job reaches a terminal state
pub async fn wait_for_terminal(
    pool: &SqlitePool,
    job_id: Uuid,
    timeout: Duration,
) -> sight_analysis::models::AnalysisJob {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let job = sight_analysis::db::jobs::get(pool, job_id)
            .await
            .unwrap()
            .expect("job should exist");
        if job.state == JobState::Completed || job.state == JobState::Failed {
            return job;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "job {} did not reach a terminal state in time (state: {:?})",
            job_id,
            job.state
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
