//! Response reads and the ingestion seam
//!
//! The snapshot query feeds the response filter. `record_scored_response`
//! is the single write path for responses: it persists the scorer's verdict
//! and folds the trust impact into the user's aggregate, clamped to its
//! bounds. The analysis worker never writes here.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;
use sight_common::models::{clamp_trust_score, Answer, Response};
use sight_common::{Error, Result};

fn response_from_row(row: &SqliteRow) -> Result<Response> {
    let response_id: String = row.get("response_id");
    let response_id = Uuid::parse_str(&response_id)
        .map_err(|e| Error::Internal(format!("Failed to parse response_id: {}", e)))?;
    let survey_id: String = row.get("survey_id");
    let survey_id = Uuid::parse_str(&survey_id)
        .map_err(|e| Error::Internal(format!("Failed to parse survey_id: {}", e)))?;
    let user_id: String = row.get("user_id");
    let user_id = Uuid::parse_str(&user_id)
        .map_err(|e| Error::Internal(format!("Failed to parse user_id: {}", e)))?;

    let started_at: String = row.get("started_at");
    let started_at = DateTime::parse_from_rfc3339(&started_at)
        .map_err(|e| Error::Internal(format!("Failed to parse started_at: {}", e)))?
        .with_timezone(&Utc);
    let submitted_at: String = row.get("submitted_at");
    let submitted_at = DateTime::parse_from_rfc3339(&submitted_at)
        .map_err(|e| Error::Internal(format!("Failed to parse submitted_at: {}", e)))?
        .with_timezone(&Utc);

    let answers: String = row.get("answers");
    let answers: Vec<Answer> = serde_json::from_str(&answers)
        .map_err(|e| Error::Internal(format!("Failed to deserialize answers: {}", e)))?;

    Ok(Response {
        response_id,
        survey_id,
        user_id,
        started_at,
        submitted_at,
        duration_ms: row.get("duration_ms"),
        answers,
        is_flagged_spam: row.get::<i64, _>("is_flagged_spam") != 0,
        trust_impact: row.get("trust_impact"),
    })
}

/// Responses for a survey submitted at or before `as_of`, excluding
/// spam-flagged responses and responses from users whose aggregate trust is
/// below `trust_floor`. Ordering is deterministic: (submitted_at,
/// response_id), so the same `(survey_id, as_of)` always reproduces the
/// identical sequence.
pub async fn snapshot_eligible(
    pool: &SqlitePool,
    survey_id: Uuid,
    as_of: DateTime<Utc>,
    trust_floor: f64,
) -> Result<Vec<Response>> {
    let rows = sqlx::query(
        r#"
        SELECT r.response_id, r.survey_id, r.user_id, r.started_at, r.submitted_at,
               r.duration_ms, r.answers, r.is_flagged_spam, r.trust_impact
        FROM responses r
        JOIN users u ON u.user_id = r.user_id
        WHERE r.survey_id = ?
          AND r.submitted_at <= ?
          AND r.is_flagged_spam = 0
          AND u.trust_score >= ?
        ORDER BY r.submitted_at, r.response_id
        "#,
    )
    .bind(survey_id.to_string())
    .bind(as_of.to_rfc3339())
    .bind(trust_floor)
    .fetch_all(pool)
    .await?;

    rows.iter().map(response_from_row).collect()
}

/// Total responses for a survey within the snapshot boundary, eligible or not
pub async fn count_within_boundary(
    pool: &SqlitePool,
    survey_id: Uuid,
    as_of: DateTime<Utc>,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM responses WHERE survey_id = ? AND submitted_at <= ?",
    )
    .bind(survey_id.to_string())
    .bind(as_of.to_rfc3339())
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Persist a scored response and apply its trust impact to the user's
/// aggregate, clamped to [0, 100]. The response row is written once and
/// never updated afterwards.
pub async fn record_scored_response(pool: &SqlitePool, response: &Response) -> Result<()> {
    let answers = serde_json::to_string(&response.answers)
        .map_err(|e| Error::Internal(format!("Failed to serialize answers: {}", e)))?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO responses (response_id, survey_id, user_id, started_at, submitted_at,
                               duration_ms, answers, is_flagged_spam, trust_impact)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(response.response_id.to_string())
    .bind(response.survey_id.to_string())
    .bind(response.user_id.to_string())
    .bind(response.started_at.to_rfc3339())
    .bind(response.submitted_at.to_rfc3339())
    .bind(response.duration_ms)
    .bind(&answers)
    .bind(response.is_flagged_spam as i64)
    .bind(response.trust_impact)
    .execute(&mut *tx)
    .await?;

    let current: Option<f64> =
        sqlx::query_scalar("SELECT trust_score FROM users WHERE user_id = ?")
            .bind(response.user_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;

    let current = current.ok_or_else(|| {
        Error::NotFound(format!("User not found: {}", response.user_id))
    })?;

    // Trust impacts are small reals; one spam hit costs more than several
    // clean responses earn.
    let updated = clamp_trust_score(current + response.trust_impact);
    sqlx::query("UPDATE users SET trust_score = ? WHERE user_id = ?")
        .bind(updated)
        .bind(response.user_id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(())
}

/// Current aggregate trust for a user
pub async fn get_user_trust(pool: &SqlitePool, user_id: Uuid) -> Result<Option<f64>> {
    let trust: Option<f64> =
        sqlx::query_scalar("SELECT trust_score FROM users WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_optional(pool)
            .await?;

    Ok(trust)
}
