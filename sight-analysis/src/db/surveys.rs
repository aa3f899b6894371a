//! Read-only survey and question access
//!
//! Surveys are authored by the CRUD services; the analysis service only
//! checks existence/publication and loads question metadata for scoring
//! and corpus building.

use sqlx::{Row, SqlitePool};
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;
use sight_common::models::{PublishState, Question, QuestionType, Survey};
use sight_common::{Error, Result};

fn survey_from_row(row: &SqliteRow) -> Result<Survey> {
    let survey_id: String = row.get("survey_id");
    let survey_id = Uuid::parse_str(&survey_id)
        .map_err(|e| Error::Internal(format!("Failed to parse survey_id: {}", e)))?;
    let creator_id: String = row.get("creator_id");
    let creator_id = Uuid::parse_str(&creator_id)
        .map_err(|e| Error::Internal(format!("Failed to parse creator_id: {}", e)))?;

    let draft: String = row.get("draft");
    let draft = match draft.as_str() {
        "published" => PublishState::Published,
        _ => PublishState::Unpublished,
    };

    Ok(Survey {
        survey_id,
        creator_id,
        title: row.get("title"),
        description: row.get("description"),
        reward_points: row.get("reward_points"),
        estimated_minutes: row.get("estimated_minutes"),
        draft,
        is_correlation_friendly: row.get::<i64, _>("is_correlation_friendly") != 0,
    })
}

/// Load a survey by id
pub async fn get_survey(pool: &SqlitePool, survey_id: Uuid) -> Result<Option<Survey>> {
    let row = sqlx::query(
        "SELECT survey_id, creator_id, title, description, reward_points, estimated_minutes, \
         draft, is_correlation_friendly FROM surveys WHERE survey_id = ?",
    )
    .bind(survey_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(survey_from_row).transpose()
}

/// Load a survey's questions in declared order
pub async fn load_questions(pool: &SqlitePool, survey_id: Uuid) -> Result<Vec<Question>> {
    let rows = sqlx::query(
        "SELECT question_id, survey_id, ord, text, question_type, options, is_required \
         FROM questions WHERE survey_id = ? ORDER BY ord",
    )
    .bind(survey_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let question_id: String = row.get("question_id");
            let question_id = Uuid::parse_str(&question_id)
                .map_err(|e| Error::Internal(format!("Failed to parse question_id: {}", e)))?;

            let question_type: String = row.get("question_type");
            let question_type: QuestionType =
                serde_json::from_str(&format!("\"{}\"", question_type)).map_err(|e| {
                    Error::Internal(format!(
                        "Unknown question type '{}': {}",
                        question_type, e
                    ))
                })?;

            let options: String = row.get("options");
            let options: Vec<String> = serde_json::from_str(&options)
                .map_err(|e| Error::Internal(format!("Failed to deserialize options: {}", e)))?;

            Ok(Question {
                question_id,
                survey_id,
                order: row.get("ord"),
                text: row.get("text"),
                question_type,
                options,
                is_required: row.get::<i64, _>("is_required") != 0,
            })
        })
        .collect()
}
