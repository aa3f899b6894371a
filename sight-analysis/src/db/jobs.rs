//! Analysis job store
//!
//! All mutation goes through compare-and-set transitions keyed on the
//! stored state, so at most one worker ever owns a job and terminal states
//! are append-only. A lost CAS surfaces as `Conflict` and performs no write.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;
use sight_common::{Error, Result};

use crate::models::{AnalysisJob, JobState, SnapshotAudit};

/// Terminal payload carried by a state transition
#[derive(Debug, Default, Clone)]
pub struct TransitionPayload {
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub snapshot: Option<SnapshotAudit>,
}

impl TransitionPayload {
    pub fn completed(result: serde_json::Value, snapshot: SnapshotAudit) -> Self {
        Self {
            result: Some(result),
            error: None,
            snapshot: Some(snapshot),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
            snapshot: None,
        }
    }

    pub fn failed_with_snapshot(error: impl Into<String>, snapshot: SnapshotAudit) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
            snapshot: Some(snapshot),
        }
    }
}

fn encode_state(state: JobState) -> Result<String> {
    serde_json::to_string(&state)
        .map_err(|e| Error::Internal(format!("Failed to serialize job state: {}", e)))
}

fn decode_state(raw: &str) -> Result<JobState> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("Failed to deserialize job state '{}': {}", raw, e)))
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
        .map(|dt| dt.with_timezone(&Utc))
}

fn job_from_row(row: &SqliteRow) -> Result<AnalysisJob> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Internal(format!("Failed to parse job_id: {}", e)))?;
    let survey_id: String = row.get("survey_id");
    let survey_id = Uuid::parse_str(&survey_id)
        .map_err(|e| Error::Internal(format!("Failed to parse survey_id: {}", e)))?;
    let requester_id: String = row.get("requester_id");
    let requester_id = Uuid::parse_str(&requester_id)
        .map_err(|e| Error::Internal(format!("Failed to parse requester_id: {}", e)))?;

    let state: String = row.get("state");
    let state = decode_state(&state)?;

    let submitted_at: String = row.get("submitted_at");
    let submitted_at = parse_timestamp(&submitted_at, "submitted_at")?;
    let completed_at: Option<String> = row.get("completed_at");
    let completed_at = completed_at
        .map(|s| parse_timestamp(&s, "completed_at"))
        .transpose()?;

    let result: Option<String> = row.get("result");
    let result = result
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize result: {}", e)))?;

    let snapshot_as_of: Option<String> = row.get("snapshot_as_of");
    let snapshot = match snapshot_as_of {
        Some(as_of) => Some(SnapshotAudit {
            as_of: parse_timestamp(&as_of, "snapshot_as_of")?,
            eligible_count: row.get::<Option<i64>, _>("eligible_count").unwrap_or(0),
            excluded_count: row.get::<Option<i64>, _>("excluded_count").unwrap_or(0),
        }),
        None => None,
    };

    Ok(AnalysisJob {
        job_id,
        survey_id,
        requester_id,
        state,
        submitted_at,
        completed_at,
        result,
        error: row.get("error"),
        attempts: row.get("attempts"),
        cancel_requested: row.get::<i64, _>("cancel_requested") != 0,
        snapshot,
    })
}

const JOB_COLUMNS: &str = "job_id, survey_id, requester_id, state, submitted_at, completed_at, \
                           result, error, attempts, cancel_requested, \
                           snapshot_as_of, eligible_count, excluded_count";

/// Create a new PENDING job
pub async fn create(pool: &SqlitePool, survey_id: Uuid, requester_id: Uuid) -> Result<AnalysisJob> {
    let job = AnalysisJob::new(survey_id, requester_id);

    sqlx::query(
        r#"
        INSERT INTO analysis_jobs (job_id, survey_id, requester_id, state, submitted_at, attempts)
        VALUES (?, ?, ?, ?, ?, 0)
        "#,
    )
    .bind(job.job_id.to_string())
    .bind(job.survey_id.to_string())
    .bind(job.requester_id.to_string())
    .bind(encode_state(job.state)?)
    .bind(job.submitted_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(job)
}

/// Load a job by id
pub async fn get(pool: &SqlitePool, job_id: Uuid) -> Result<Option<AnalysisJob>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM analysis_jobs WHERE job_id = ?",
        JOB_COLUMNS
    ))
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// List jobs submitted by one requester, most recent first
pub async fn list_by_requester(pool: &SqlitePool, requester_id: Uuid) -> Result<Vec<AnalysisJob>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM analysis_jobs WHERE requester_id = ? ORDER BY submitted_at DESC, job_id",
        JOB_COLUMNS
    ))
    .bind(requester_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// List all jobs, most recent first (privileged callers)
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<AnalysisJob>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM analysis_jobs ORDER BY submitted_at DESC, job_id",
        JOB_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Compare-and-set state transition.
///
/// The UPDATE is conditioned on the stored state matching `from`; zero rows
/// affected means another worker won the race (or the job is already
/// terminal) and the call fails with `Conflict` without writing anything.
pub async fn transition(
    pool: &SqlitePool,
    job_id: Uuid,
    from: JobState,
    to: JobState,
    payload: &TransitionPayload,
) -> Result<()> {
    if !from.can_transition_to(to) {
        return Err(Error::InvalidInput(format!(
            "Illegal job transition {:?} -> {:?}",
            from, to
        )));
    }
    if to == JobState::Completed && (payload.result.is_none() || payload.error.is_some()) {
        return Err(Error::InvalidInput(
            "Completed transition requires a result and no error".to_string(),
        ));
    }
    if to == JobState::Failed && (payload.error.is_none() || payload.result.is_some()) {
        return Err(Error::InvalidInput(
            "Failed transition requires an error and no result".to_string(),
        ));
    }

    let completed_at = to.is_terminal().then(|| Utc::now().to_rfc3339());
    let result = payload
        .result
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize result: {}", e)))?;

    let outcome = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET state = ?,
            completed_at = ?,
            result = ?,
            error = ?,
            snapshot_as_of = COALESCE(?, snapshot_as_of),
            eligible_count = COALESCE(?, eligible_count),
            excluded_count = COALESCE(?, excluded_count)
        WHERE job_id = ? AND state = ?
        "#,
    )
    .bind(encode_state(to)?)
    .bind(completed_at)
    .bind(result)
    .bind(&payload.error)
    .bind(payload.snapshot.map(|s| s.as_of.to_rfc3339()))
    .bind(payload.snapshot.map(|s| s.eligible_count))
    .bind(payload.snapshot.map(|s| s.excluded_count))
    .bind(job_id.to_string())
    .bind(encode_state(from)?)
    .execute(pool)
    .await?;

    if outcome.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "Job {} is not in state {:?}",
            job_id, from
        )));
    }

    tracing::debug!(job_id = %job_id, from = ?from, to = ?to, "Job state transition");
    Ok(())
}

/// Increment the attempt counter for a RUNNING job, returning the new count.
///
/// Fails with `Conflict` when the job is no longer running.
pub async fn begin_attempt(pool: &SqlitePool, job_id: Uuid) -> Result<i64> {
    let outcome = sqlx::query(
        "UPDATE analysis_jobs SET attempts = attempts + 1 WHERE job_id = ? AND state = ?",
    )
    .bind(job_id.to_string())
    .bind(encode_state(JobState::Running)?)
    .execute(pool)
    .await?;

    if outcome.rows_affected() == 0 {
        return Err(Error::Conflict(format!("Job {} is not running", job_id)));
    }

    let attempts: i64 =
        sqlx::query_scalar("SELECT attempts FROM analysis_jobs WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_one(pool)
            .await?;

    Ok(attempts)
}

/// Record a cancellation request. Returns false if the job is already
/// terminal (nothing to cancel).
pub async fn request_cancel(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let pending = encode_state(JobState::Pending)?;
    let running = encode_state(JobState::Running)?;

    let outcome = sqlx::query(
        "UPDATE analysis_jobs SET cancel_requested = 1 WHERE job_id = ? AND state IN (?, ?)",
    )
    .bind(job_id.to_string())
    .bind(pending)
    .bind(running)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() > 0)
}

/// Check the cancellation flag
pub async fn is_cancel_requested(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let flag: Option<i64> =
        sqlx::query_scalar("SELECT cancel_requested FROM analysis_jobs WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(pool)
            .await?;

    Ok(flag.unwrap_or(0) != 0)
}

/// Job ids still PENDING, oldest first (startup recovery re-enqueues these)
pub async fn list_pending_ids(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT job_id FROM analysis_jobs WHERE state = ? ORDER BY submitted_at",
    )
    .bind(encode_state(JobState::Pending)?)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|s| {
            Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Failed to parse job_id: {}", e)))
        })
        .collect()
}

/// Fail RUNNING jobs left over from a previous process.
///
/// A running job's worker died with the process; the job will never
/// progress, so it is failed with a restart note. Returns the count.
pub async fn fail_orphaned_running(pool: &SqlitePool) -> Result<usize> {
    let outcome = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET state = ?,
            completed_at = ?,
            error = 'Analysis interrupted by service restart; re-submit the survey for analysis'
        WHERE state = ?
        "#,
    )
    .bind(encode_state(JobState::Failed)?)
    .bind(Utc::now().to_rfc3339())
    .bind(encode_state(JobState::Running)?)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() as usize)
}
