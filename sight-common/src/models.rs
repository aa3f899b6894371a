//! Domain models shared across Sight services
//!
//! Surveys, questions and responses are owned by the CRUD services; the
//! analysis service holds a read-only view of them. User trust is an
//! aggregate clamped to [0, 100] and is mutated only at response ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bounds for the per-user aggregate trust score
pub const TRUST_SCORE_MIN: f64 = 0.0;
pub const TRUST_SCORE_MAX: f64 = 100.0;

/// Allowed drift between the reported duration and the timestamp delta
pub const DURATION_TOLERANCE_MS: i64 = 1_000;

/// Survey publication state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishState {
    Published,
    Unpublished,
}

/// Question answer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Text,
    MultipleChoice,
    SingleChoice,
}

/// A survey definition (read model)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Survey {
    pub survey_id: Uuid,
    pub creator_id: Uuid,
    pub title: String,
    pub description: String,
    pub reward_points: i64,
    pub estimated_minutes: i64,
    pub draft: PublishState,
    pub is_correlation_friendly: bool,
}

impl Survey {
    pub fn is_published(&self) -> bool {
        self.draft == PublishState::Published
    }
}

/// A question belonging to a survey (read model)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question_id: Uuid,
    pub survey_id: Uuid,
    pub order: i64,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    /// Allowed options for choice questions; empty for free text
    #[serde(default)]
    pub options: Vec<String>,
    pub is_required: bool,
}

/// One (question, value) pair within a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: Uuid,
    pub value: String,
}

/// One survey submission by one user
///
/// Immutable after submission. `is_flagged_spam` and `trust_impact` are
/// written once at ingestion time from the trust scorer's verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub response_id: Uuid,
    pub survey_id: Uuid,
    pub user_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub answers: Vec<Answer>,
    pub is_flagged_spam: bool,
    pub trust_impact: f64,
}

impl Response {
    /// Duration must equal submitted - started (within a small clock
    /// tolerance) and be non-negative. The scorer's pace check trusts
    /// `duration_ms`, so a self-reported duration that disagrees with the
    /// timestamps is rejected rather than scored.
    pub fn validate_duration(&self) -> bool {
        let delta = (self.submitted_at - self.started_at).num_milliseconds();
        self.duration_ms >= 0
            && delta >= 0
            && (self.duration_ms - delta).abs() <= DURATION_TOLERANCE_MS
    }
}

/// Clamp a user's aggregate trust score to its configured bounds
pub fn clamp_trust_score(score: f64) -> f64 {
    score.clamp(TRUST_SCORE_MIN, TRUST_SCORE_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_score_clamped_to_bounds() {
        assert_eq!(clamp_trust_score(-5.0), 0.0);
        assert_eq!(clamp_trust_score(50.0), 50.0);
        assert_eq!(clamp_trust_score(150.0), 100.0);
    }

    #[test]
    fn negative_duration_fails_validation() {
        let now = Utc::now();
        let response = Response {
            response_id: Uuid::new_v4(),
            survey_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            started_at: now,
            submitted_at: now - chrono::Duration::seconds(10),
            duration_ms: -10_000,
            answers: Vec::new(),
            is_flagged_spam: false,
            trust_impact: 0.0,
        };
        assert!(!response.validate_duration());
    }

    #[test]
    fn duration_must_match_timestamp_delta() {
        let now = Utc::now();
        let mut response = Response {
            response_id: Uuid::new_v4(),
            survey_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            started_at: now - chrono::Duration::seconds(120),
            submitted_at: now,
            duration_ms: 120_000,
            answers: Vec::new(),
            is_flagged_spam: false,
            trust_impact: 0.0,
        };
        assert!(response.validate_duration());

        // Within tolerance: clocks drift a little
        response.duration_ms = 120_000 + DURATION_TOLERANCE_MS;
        assert!(response.validate_duration());

        // A reported duration the timestamps contradict is rejected
        response.duration_ms = 240_000;
        assert!(!response.validate_duration());
        response.duration_ms = 2_000;
        assert!(!response.validate_duration());
    }

    #[test]
    fn question_type_serializes_snake_case() {
        let json = serde_json::to_string(&QuestionType::MultipleChoice).unwrap();
        assert_eq!(json, "\"multiple_choice\"");
    }
}
