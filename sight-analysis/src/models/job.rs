//! Analysis job state machine
//!
//! A job progresses PENDING → RUNNING → { COMPLETED, FAILED }. Terminal
//! states are append-only: a failed job is re-submitted as a new job, never
//! reset, so job history stays immutable and auditable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Analysis job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Created and queued, not yet picked up by a worker
    Pending,
    /// Exclusively owned by one worker
    Running,
    /// Finished with a result payload
    Completed,
    /// Finished with an error detail (provider exhaustion, insufficient
    /// data, cancellation, restart)
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether a transition from `self` to `to` is legal
    pub fn can_transition_to(&self, to: JobState) -> bool {
        matches!(
            (self, to),
            (JobState::Pending, JobState::Running)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
        )
    }
}

/// Which responses a job analyzed, recorded at completion for
/// reproducibility: re-running the filter with the same survey and `as_of`
/// boundary reproduces the identical set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SnapshotAudit {
    /// Snapshot boundary: only responses submitted at or before this instant
    pub as_of: DateTime<Utc>,
    pub eligible_count: i64,
    pub excluded_count: i64,
}

/// A tracked unit of asynchronous analysis work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub job_id: Uuid,
    pub survey_id: Uuid,
    pub requester_id: Uuid,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Result payload; mutually exclusive with `error`, both None until
    /// the job reaches a terminal state
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Provider attempts made so far; bounded by scheduler.max_attempts
    pub attempts: i64,
    /// Cancellation flag, honored only at the next retry boundary
    pub cancel_requested: bool,
    pub snapshot: Option<SnapshotAudit>,
}

impl AnalysisJob {
    /// Create a new job in PENDING state
    pub fn new(survey_id: Uuid, requester_id: Uuid) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            survey_id,
            requester_id,
            state: JobState::Pending,
            submitted_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
            attempts: 0,
            cancel_requested: false,
            snapshot: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_pending_with_empty_outcome() {
        let job = AnalysisJob::new(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(job.state, JobState::Pending);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert_eq!(job.attempts, 0);
        assert!(!job.is_terminal());
    }

    #[test]
    fn only_forward_transitions_are_legal() {
        assert!(JobState::Pending.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(JobState::Running.can_transition_to(JobState::Failed));

        // No backwards or self transitions; no resurrection of terminal jobs
        assert!(!JobState::Pending.can_transition_to(JobState::Failed));
        assert!(!JobState::Running.can_transition_to(JobState::Pending));
        assert!(!JobState::Failed.can_transition_to(JobState::Pending));
        assert!(!JobState::Failed.can_transition_to(JobState::Running));
        assert!(!JobState::Completed.can_transition_to(JobState::Failed));
        assert!(!JobState::Pending.can_transition_to(JobState::Completed));
    }

    #[test]
    fn state_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&JobState::Pending).unwrap(), "\"PENDING\"");
        assert_eq!(serde_json::to_string(&JobState::Completed).unwrap(), "\"COMPLETED\"");
    }
}
