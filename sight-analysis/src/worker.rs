//! Job scheduler and worker pool
//!
//! A bounded mpsc queue of pending job ids feeds N concurrent workers
//! (enforced by a semaphore). Submission is fast: one store write plus an
//! enqueue; execution is fully decoupled and the caller polls for status.
//!
//! Per job, one worker drives the CAS chain PENDING → RUNNING →
//! { COMPLETED, FAILED }. A worker that loses the claim race aborts without
//! side effects. Nothing in the worker loop is allowed to crash the
//! process: every failure is recorded into the job's terminal state.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AnalysisConfig;
use crate::db::jobs::{self, TransitionPayload};
use crate::db::surveys;
use crate::filter::{self, SelectOutcome, Snapshot};
use crate::models::{AnalysisJob, JobState};
use crate::provider::{AnalysisCorpus, AnalysisProvider};
use sight_common::Error;

/// Submission failure, mapped to HTTP status by the API layer
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Survey not found: {0}")]
    SurveyNotFound(Uuid),

    #[error("Survey is not published: {0}")]
    SurveyNotPublished(Uuid),

    #[error(transparent)]
    Common(#[from] sight_common::Error),
}

/// Handle for submitting and enqueuing analysis jobs
#[derive(Clone)]
pub struct JobScheduler {
    pool: SqlitePool,
    tx: mpsc::Sender<Uuid>,
}

impl JobScheduler {
    /// Start the dispatcher and worker pool, returning the scheduler handle
    pub fn start(
        pool: SqlitePool,
        provider: Arc<dyn AnalysisProvider>,
        config: Arc<AnalysisConfig>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.scheduler.queue_capacity);

        tokio::spawn(dispatch_loop(pool.clone(), provider, config, rx));

        Self { pool, tx }
    }

    /// Validate the survey, create a PENDING job and enqueue it.
    ///
    /// Returns immediately with the job; analysis happens asynchronously.
    pub async fn submit(
        &self,
        survey_id: Uuid,
        requester_id: Uuid,
    ) -> Result<AnalysisJob, SubmitError> {
        let survey = surveys::get_survey(&self.pool, survey_id)
            .await?
            .ok_or(SubmitError::SurveyNotFound(survey_id))?;
        if !survey.is_published() {
            return Err(SubmitError::SurveyNotPublished(survey_id));
        }

        let job = jobs::create(&self.pool, survey_id, requester_id).await?;

        info!(
            job_id = %job.job_id,
            survey_id = %survey_id,
            requester_id = %requester_id,
            "Analysis job submitted"
        );

        self.enqueue(job.job_id).await?;

        Ok(job)
    }

    /// Push a job id onto the pending queue
    pub async fn enqueue(&self, job_id: Uuid) -> Result<(), sight_common::Error> {
        self.tx
            .send(job_id)
            .await
            .map_err(|_| Error::Internal("Job queue is closed".to_string()))
    }

    /// Startup recovery: jobs left over from a previous process.
    ///
    /// RUNNING jobs lost their worker with the process and are failed with
    /// a restart note; PENDING jobs are re-enqueued.
    pub async fn recover_stale_jobs(&self) -> Result<usize, sight_common::Error> {
        let orphaned = jobs::fail_orphaned_running(&self.pool).await?;
        if orphaned > 0 {
            warn!(count = orphaned, "Failed orphaned running jobs from previous run");
        }

        let pending = jobs::list_pending_ids(&self.pool).await?;
        let requeued = pending.len();
        for job_id in pending {
            self.enqueue(job_id).await?;
        }
        if requeued > 0 {
            info!(count = requeued, "Re-enqueued pending jobs from previous run");
        }

        Ok(orphaned + requeued)
    }
}

/// Dispatcher: pulls job ids off the queue and hands them to workers,
/// bounded by the worker-count semaphore
async fn dispatch_loop(
    pool: SqlitePool,
    provider: Arc<dyn AnalysisProvider>,
    config: Arc<AnalysisConfig>,
    mut rx: mpsc::Receiver<Uuid>,
) {
    let slots = Arc::new(Semaphore::new(config.scheduler.worker_count));

    while let Some(job_id) = rx.recv().await {
        let permit = match slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break, // semaphore closed, shutting down
        };

        let pool = pool.clone();
        let provider = provider.clone();
        let config = config.clone();
        tokio::spawn(async move {
            process_job(&pool, provider.as_ref(), &config, job_id).await;
            drop(permit);
        });
    }

    debug!("Job queue closed, dispatcher exiting");
}

/// Process one job end to end. All errors are caught at this boundary and
/// recorded into the job's terminal state.
pub async fn process_job(
    pool: &SqlitePool,
    provider: &dyn AnalysisProvider,
    config: &AnalysisConfig,
    job_id: Uuid,
) {
    // Claim the job. Exactly one worker wins this CAS; losers abort
    // without side effects.
    match jobs::transition(
        pool,
        job_id,
        JobState::Pending,
        JobState::Running,
        &TransitionPayload::default(),
    )
    .await
    {
        Ok(()) => {}
        Err(Error::Conflict(_)) => {
            debug!(job_id = %job_id, "Job already claimed, skipping");
            return;
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to claim job");
            return;
        }
    }

    if let Err(e) = run_claimed_job(pool, provider, config, job_id).await {
        error!(job_id = %job_id, error = %e, "Analysis job failed outside the attempt loop");

        // Ensure the job still reaches a terminal state. A Conflict here
        // means it already did.
        let payload = TransitionPayload::failed(format!("Analysis failed: {}", e));
        if let Err(e) =
            jobs::transition(pool, job_id, JobState::Running, JobState::Failed, &payload).await
        {
            if !matches!(e, Error::Conflict(_)) {
                error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
            }
        }
    }
}

/// Drive a claimed (RUNNING) job: snapshot, analyze with retry, finish.
async fn run_claimed_job(
    pool: &SqlitePool,
    provider: &dyn AnalysisProvider,
    config: &AnalysisConfig,
    job_id: Uuid,
) -> sight_common::Result<()> {
    let job = jobs::get(pool, job_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Claimed job {} not found", job_id)))?;

    // The snapshot boundary is the submission instant: responses arriving
    // later never change this job's input set.
    let as_of = job.submitted_at;

    if jobs::is_cancel_requested(pool, job_id).await? {
        let payload = TransitionPayload::failed("Cancelled before analysis started");
        jobs::transition(pool, job_id, JobState::Running, JobState::Failed, &payload).await?;
        info!(job_id = %job_id, "Job cancelled before analysis started");
        return Ok(());
    }

    let snapshot = match filter::select_eligible(pool, job.survey_id, as_of, &config.filter).await?
    {
        SelectOutcome::Ready(snapshot) => snapshot,
        SelectOutcome::Insufficient { audit, needed } => {
            // Structured terminal failure; the provider is never invoked.
            let payload = TransitionPayload::failed_with_snapshot(
                format!(
                    "Insufficient data: {} eligible responses, {} required",
                    audit.eligible_count, needed
                ),
                audit,
            );
            jobs::transition(pool, job_id, JobState::Running, JobState::Failed, &payload).await?;
            info!(
                job_id = %job_id,
                eligible = audit.eligible_count,
                needed,
                "Job failed: insufficient data"
            );
            return Ok(());
        }
    };

    let questions = surveys::load_questions(pool, job.survey_id).await?;
    let corpus = AnalysisCorpus::from_snapshot(&snapshot, &questions);

    analyze_with_retry(pool, provider, config, job_id, &snapshot, &corpus).await
}

/// Invoke the provider under a hard timeout, retrying with exponential
/// backoff up to the attempt ceiling. Cancellation is honored only at
/// retry boundaries, never by tearing down an in-flight call.
async fn analyze_with_retry(
    pool: &SqlitePool,
    provider: &dyn AnalysisProvider,
    config: &AnalysisConfig,
    job_id: Uuid,
    snapshot: &Snapshot,
    corpus: &AnalysisCorpus,
) -> sight_common::Result<()> {
    let call_timeout = Duration::from_secs(config.provider.timeout_secs);
    let max_attempts = config.scheduler.max_attempts as i64;
    let mut backoff_ms = config.scheduler.backoff_initial_ms;

    loop {
        let attempt = jobs::begin_attempt(pool, job_id).await?;

        let last_error = match tokio::time::timeout(call_timeout, provider.analyze(corpus)).await {
            Ok(Ok(insight)) => {
                let result = serde_json::to_value(&insight)
                    .map_err(|e| Error::Internal(format!("Failed to serialize insight: {}", e)))?;
                let payload = TransitionPayload::completed(result, snapshot.audit());
                jobs::transition(pool, job_id, JobState::Running, JobState::Completed, &payload)
                    .await?;
                info!(
                    job_id = %job_id,
                    attempt,
                    eligible = snapshot.eligible_count,
                    "Analysis job completed"
                );
                return Ok(());
            }
            Ok(Err(e)) => format!("Provider error: {}", e),
            Err(_) => format!(
                "Provider timed out after {}s",
                config.provider.timeout_secs
            ),
        };

        warn!(
            job_id = %job_id,
            attempt,
            max_attempts,
            error = %last_error,
            "Analysis attempt failed"
        );

        if attempt >= max_attempts {
            let payload = TransitionPayload::failed_with_snapshot(last_error, snapshot.audit());
            jobs::transition(pool, job_id, JobState::Running, JobState::Failed, &payload).await?;
            info!(job_id = %job_id, attempt, "Analysis job failed: attempts exhausted");
            return Ok(());
        }

        // Retry boundary: the only place cancellation takes effect
        if jobs::is_cancel_requested(pool, job_id).await? {
            let payload =
                TransitionPayload::failed_with_snapshot("Cancelled by requester", snapshot.audit());
            jobs::transition(pool, job_id, JobState::Running, JobState::Failed, &payload).await?;
            info!(job_id = %job_id, attempt, "Job cancelled at retry boundary");
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(config.scheduler.backoff_cap_ms);
    }
}
