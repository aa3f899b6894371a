//! Analysis job API handlers
//!
//! POST /analyse/analyze, GET /analyse/analyze, GET /analyse/analyze/:id,
//! POST /analyse/analyze/:id/cancel. All routes require bearer auth; a job
//! is visible only to its requester (admins see all).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db::jobs;
use crate::error::{ApiError, ApiResult};
use crate::models::{AnalysisJob, JobState, SnapshotAudit};
use crate::worker::SubmitError;
use crate::AppState;

/// POST /analyse/analyze request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnalysisRequest {
    pub survey_id: Uuid,
}

/// POST /analyse/analyze response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnalysisResponse {
    pub job_id: Uuid,
    pub state: &'static str,
    pub submitted_at: DateTime<Utc>,
}

/// Snapshot audit fields on a terminal job
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView {
    pub as_of: DateTime<Utc>,
    pub eligible_count: i64,
    pub excluded_count: i64,
}

impl From<SnapshotAudit> for SnapshotView {
    fn from(audit: SnapshotAudit) -> Self {
        Self {
            as_of: audit.as_of,
            eligible_count: audit.eligible_count,
            excluded_count: audit.excluded_count,
        }
    }
}

/// GET /analyse/analyze/:id response; also the list entry shape
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub survey_id: Uuid,
    pub state: &'static str,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotView>,
}

/// POST /analyse/analyze/:id/cancel response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub cancel_requested: bool,
}

/// Wire label for a job state (stored uppercase, served lowercase)
fn state_label(state: JobState) -> &'static str {
    match state {
        JobState::Pending => "pending",
        JobState::Running => "running",
        JobState::Completed => "completed",
        JobState::Failed => "failed",
    }
}

impl From<AnalysisJob> for JobStatusResponse {
    fn from(job: AnalysisJob) -> Self {
        Self {
            job_id: job.job_id,
            survey_id: job.survey_id,
            state: state_label(job.state),
            submitted_at: job.submitted_at,
            completed_at: job.completed_at,
            result: job.result,
            error: job.error,
            attempts: job.attempts,
            snapshot: job.snapshot.map(SnapshotView::from),
        }
    }
}

/// POST /analyse/analyze
///
/// Create and enqueue an analysis job for a survey. Returns 201 with the
/// job id immediately; the caller polls for status.
pub async fn submit_analysis(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SubmitAnalysisRequest>,
) -> ApiResult<(StatusCode, Json<SubmitAnalysisResponse>)> {
    let job = state
        .scheduler
        .submit(request.survey_id, user.user_id)
        .await
        .map_err(|e| match e {
            SubmitError::SurveyNotFound(id) => {
                ApiError::NotFound(format!("Survey not found: {}", id))
            }
            SubmitError::SurveyNotPublished(id) => {
                ApiError::Forbidden(format!("Survey is not published: {}", id))
            }
            SubmitError::Common(e) => e.into(),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitAnalysisResponse {
            job_id: job.job_id,
            state: state_label(job.state),
            submitted_at: job.submitted_at,
        }),
    ))
}

/// Load a job, enforcing ownership. Foreign jobs are indistinguishable
/// from missing ones for non-admin callers.
async fn load_owned_job(
    state: &AppState,
    user: &AuthUser,
    job_id: Uuid,
) -> ApiResult<AnalysisJob> {
    let job = jobs::get(&state.db, job_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("Analysis job not found: {}", job_id)))?;

    if job.requester_id != user.user_id && !user.is_admin() {
        return Err(ApiError::NotFound(format!(
            "Analysis job not found: {}",
            job_id
        )));
    }

    Ok(job)
}

/// GET /analyse/analyze/:analysis_id
///
/// Current state plus, when terminal, the result or error detail.
pub async fn get_analysis_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(analysis_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = load_owned_job(&state, &user, analysis_id).await?;
    Ok(Json(job.into()))
}

/// GET /analyse/analyze
///
/// The caller's jobs, most recent first. Admins see all jobs.
pub async fn list_analyses(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<JobStatusResponse>>> {
    let jobs = if user.is_admin() {
        jobs::list_all(&state.db).await
    } else {
        jobs::list_by_requester(&state.db, user.user_id).await
    }
    .map_err(ApiError::from)?;

    Ok(Json(jobs.into_iter().map(JobStatusResponse::from).collect()))
}

/// POST /analyse/analyze/:analysis_id/cancel
///
/// Record a cancellation request. In-flight provider calls are never torn
/// down; the flag takes effect at the next retry boundary.
pub async fn cancel_analysis(
    State(state): State<AppState>,
    user: AuthUser,
    Path(analysis_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    let job = load_owned_job(&state, &user, analysis_id).await?;

    if job.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Analysis job already in terminal state: {}",
            state_label(job.state)
        )));
    }

    let accepted = jobs::request_cancel(&state.db, analysis_id)
        .await
        .map_err(ApiError::from)?;
    if !accepted {
        // Raced with the worker finishing; the job is terminal now
        return Err(ApiError::Conflict(
            "Analysis job reached a terminal state before cancellation".to_string(),
        ));
    }

    tracing::info!(job_id = %analysis_id, "Cancellation requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id: analysis_id,
            cancel_requested: true,
        }),
    ))
}

/// Build analysis routes
pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/analyse/analyze", post(submit_analysis).get(list_analyses))
        .route("/analyse/analyze/:analysis_id", get(get_analysis_status))
        .route("/analyse/analyze/:analysis_id/cancel", post(cancel_analysis))
}
