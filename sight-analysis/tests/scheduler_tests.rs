//! Scheduler and worker pool tests: retry/backoff/timeout policy,
//! insufficient data, cancellation, submission validation, end-to-end flow

mod helpers;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use sight_analysis::db::jobs;
use sight_analysis::models::JobState;
use sight_analysis::worker::{process_job, JobScheduler, SubmitError};

#[tokio::test]
async fn insufficient_data_fails_without_calling_the_provider() {
    let pool = helpers::test_pool().await;
    let config = helpers::test_config(); // min_sample_size = 5
    let survey_id = helpers::seed_survey(&pool, true).await;
    let questions = helpers::seed_questions(&pool, survey_id, 4).await;
    helpers::seed_eligible_responses(&pool, survey_id, &questions, 3, Utc::now() - ChronoDuration::minutes(5)).await;

    let provider = helpers::ScriptedProvider::failing(0);
    let job = jobs::create(&pool, survey_id, Uuid::new_v4()).await.unwrap();

    process_job(&pool, provider.as_ref(), &config, job.job_id).await;

    let job = jobs::get(&pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.error.as_deref().unwrap().contains("Insufficient data"));
    assert_eq!(job.attempts, 0);
    assert_eq!(provider.call_count(), 0, "provider must never be invoked");

    // Snapshot audit is still recorded for the structured failure
    let snapshot = job.snapshot.unwrap();
    assert_eq!(snapshot.eligible_count, 3);
}

#[tokio::test]
async fn provider_failing_twice_then_succeeding_completes_on_third_attempt() {
    let pool = helpers::test_pool().await;
    let config = helpers::test_config(); // max_attempts = 3
    let survey_id = helpers::seed_survey(&pool, true).await;
    let questions = helpers::seed_questions(&pool, survey_id, 4).await;
    helpers::seed_eligible_responses(&pool, survey_id, &questions, 6, Utc::now() - ChronoDuration::minutes(5)).await;

    let provider = helpers::ScriptedProvider::failing(2);
    let job = jobs::create(&pool, survey_id, Uuid::new_v4()).await.unwrap();

    process_job(&pool, provider.as_ref(), &config, job.job_id).await;

    let job = jobs::get(&pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(provider.call_count(), 3);

    let result = job.result.unwrap();
    assert_eq!(result["summary"], "insight from call 3");
    assert!(job.error.is_none());

    let snapshot = job.snapshot.unwrap();
    assert_eq!(snapshot.eligible_count, 6);
    assert_eq!(snapshot.excluded_count, 0);
    assert!(snapshot.as_of <= job.completed_at.unwrap());
}

#[tokio::test]
async fn provider_exhaustion_fails_with_last_error_detail() {
    let pool = helpers::test_pool().await;
    let config = helpers::test_config();
    let survey_id = helpers::seed_survey(&pool, true).await;
    let questions = helpers::seed_questions(&pool, survey_id, 4).await;
    helpers::seed_eligible_responses(&pool, survey_id, &questions, 6, Utc::now() - ChronoDuration::minutes(5)).await;

    let provider = helpers::ScriptedProvider::failing(u32::MAX);
    let job = jobs::create(&pool, survey_id, Uuid::new_v4()).await.unwrap();

    process_job(&pool, provider.as_ref(), &config, job.job_id).await;

    let job = jobs::get(&pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(provider.call_count(), 3);
    // Last attempt's detail, not the first
    assert!(job.error.as_deref().unwrap().contains("call 3"));
    assert!(job.result.is_none());
}

#[tokio::test]
async fn timeouts_count_as_attempts_and_exhaust_to_failed() {
    let pool = helpers::test_pool().await;
    let config = helpers::test_config(); // provider timeout 1s, max_attempts 3
    let survey_id = helpers::seed_survey(&pool, true).await;
    let questions = helpers::seed_questions(&pool, survey_id, 4).await;
    helpers::seed_eligible_responses(&pool, survey_id, &questions, 6, Utc::now() - ChronoDuration::minutes(5)).await;

    let provider = helpers::HangingProvider::new();
    let job = jobs::create(&pool, survey_id, Uuid::new_v4()).await.unwrap();

    process_job(&pool, provider.as_ref(), &config, job.job_id).await;

    let job = jobs::get(&pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(provider.call_count(), 3);
    assert!(job.error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn cancellation_is_honored_before_analysis_starts() {
    let pool = helpers::test_pool().await;
    let config = helpers::test_config();
    let survey_id = helpers::seed_survey(&pool, true).await;
    let questions = helpers::seed_questions(&pool, survey_id, 4).await;
    helpers::seed_eligible_responses(&pool, survey_id, &questions, 6, Utc::now() - ChronoDuration::minutes(5)).await;

    let provider = helpers::ScriptedProvider::failing(0);
    let job = jobs::create(&pool, survey_id, Uuid::new_v4()).await.unwrap();
    assert!(jobs::request_cancel(&pool, job.job_id).await.unwrap());

    process_job(&pool, provider.as_ref(), &config, job.job_id).await;

    let job = jobs::get(&pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.error.as_deref().unwrap().contains("Cancelled"));
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn submit_rejects_unknown_and_unpublished_surveys() {
    let pool = helpers::test_pool().await;
    let config = Arc::new(helpers::test_config());
    let provider = helpers::ScriptedProvider::failing(0);
    let scheduler = JobScheduler::start(pool.clone(), provider, config);

    let result = scheduler.submit(Uuid::new_v4(), Uuid::new_v4()).await;
    assert!(matches!(result, Err(SubmitError::SurveyNotFound(_))));

    let unpublished = helpers::seed_survey(&pool, false).await;
    let result = scheduler.submit(unpublished, Uuid::new_v4()).await;
    assert!(matches!(result, Err(SubmitError::SurveyNotPublished(_))));
}

#[tokio::test]
async fn submitted_job_is_processed_asynchronously_to_completion() {
    let pool = helpers::test_pool().await;
    let config = Arc::new(helpers::test_config());
    let survey_id = helpers::seed_survey(&pool, true).await;
    let questions = helpers::seed_questions(&pool, survey_id, 4).await;
    helpers::seed_eligible_responses(&pool, survey_id, &questions, 6, Utc::now() - ChronoDuration::minutes(5)).await;

    let provider = helpers::ScriptedProvider::failing(0);
    let scheduler = JobScheduler::start(pool.clone(), provider.clone(), config);

    let job = scheduler.submit(survey_id, Uuid::new_v4()).await.unwrap();
    // Submission returns immediately in PENDING
    assert_eq!(job.state, JobState::Pending);

    let finished = helpers::wait_for_terminal(&pool, job.job_id, Duration::from_secs(5)).await;
    assert_eq!(finished.state, JobState::Completed);
    assert_eq!(finished.attempts, 1);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn recovery_requeues_pending_jobs_and_fails_orphans() {
    let pool = helpers::test_pool().await;
    let config = Arc::new(helpers::test_config());
    let survey_id = helpers::seed_survey(&pool, true).await;
    let questions = helpers::seed_questions(&pool, survey_id, 4).await;
    helpers::seed_eligible_responses(&pool, survey_id, &questions, 6, Utc::now() - ChronoDuration::minutes(5)).await;

    // Simulate a previous process: one pending job, one orphaned running job
    let pending = jobs::create(&pool, survey_id, Uuid::new_v4()).await.unwrap();
    let orphan = jobs::create(&pool, survey_id, Uuid::new_v4()).await.unwrap();
    jobs::transition(
        &pool,
        orphan.job_id,
        JobState::Pending,
        JobState::Running,
        &sight_analysis::db::jobs::TransitionPayload::default(),
    )
    .await
    .unwrap();

    let provider = helpers::ScriptedProvider::failing(0);
    let scheduler = JobScheduler::start(pool.clone(), provider, config);
    let recovered = scheduler.recover_stale_jobs().await.unwrap();
    assert_eq!(recovered, 2);

    let orphan = jobs::get(&pool, orphan.job_id).await.unwrap().unwrap();
    assert_eq!(orphan.state, JobState::Failed);

    let finished = helpers::wait_for_terminal(&pool, pending.job_id, Duration::from_secs(5)).await;
    assert_eq!(finished.state, JobState::Completed);
}
