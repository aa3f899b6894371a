//! Response ingestion seam
//!
//! Scores a submitted response and persists it together with the verdict,
//! updating the submitter's aggregate trust. This is the only place that
//! writes responses or user trust; the analysis worker is strictly
//! read-only over both.

use sqlx::SqlitePool;
use sight_common::models::Response;
use sight_common::{Error, Result};

use crate::config::ScoringConfig;
use crate::db::{responses, surveys};
use crate::scoring::{self, TrustVerdict};

/// Validate, score and record one response.
///
/// The incoming response's spam flag and trust impact are ignored; they are
/// set from the scorer's verdict before the write.
pub async fn ingest_response(
    pool: &SqlitePool,
    mut response: Response,
    config: &ScoringConfig,
) -> Result<TrustVerdict> {
    if !response.validate_duration() {
        return Err(Error::InvalidInput(format!(
            "Response {} has inconsistent timestamps/duration",
            response.response_id
        )));
    }

    let questions = surveys::load_questions(pool, response.survey_id).await?;
    if questions.is_empty() {
        return Err(Error::NotFound(format!(
            "Survey not found or has no questions: {}",
            response.survey_id
        )));
    }

    // Required questions must be answered
    for question in questions.iter().filter(|q| q.is_required) {
        if !response
            .answers
            .iter()
            .any(|a| a.question_id == question.question_id)
        {
            return Err(Error::InvalidInput(format!(
                "Required question {} not answered",
                question.question_id
            )));
        }
    }

    let verdict = scoring::score(&response, &questions, config)?;
    response.is_flagged_spam = verdict.is_spam;
    response.trust_impact = verdict.trust_impact;

    responses::record_scored_response(pool, &response).await?;

    tracing::debug!(
        response_id = %response.response_id,
        user_id = %response.user_id,
        is_spam = verdict.is_spam,
        trust_impact = verdict.trust_impact,
        "Response ingested"
    );

    Ok(verdict)
}
