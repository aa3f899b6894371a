//! Response filter
//!
//! Selects the subset of a survey's responses eligible for analysis at a
//! fixed snapshot boundary. Deterministic for a given `(survey_id, as_of)`:
//! responses submitted after the boundary never retroactively change an
//! in-flight job's input set, and re-running the filter after completion
//! reproduces the identical set.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;
use sight_common::models::Response;
use sight_common::Result;

use crate::config::FilterConfig;
use crate::db;
use crate::models::SnapshotAudit;

/// The eligible response set for one analysis run
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub survey_id: Uuid,
    pub as_of: DateTime<Utc>,
    /// Eligible responses, ordered by (submitted_at, response_id)
    pub responses: Vec<Response>,
    pub eligible_count: i64,
    pub excluded_count: i64,
}

impl Snapshot {
    pub fn audit(&self) -> SnapshotAudit {
        SnapshotAudit {
            as_of: self.as_of,
            eligible_count: self.eligible_count,
            excluded_count: self.excluded_count,
        }
    }
}

/// Filter outcome: either a usable snapshot or a structured
/// insufficient-data condition (too few eligible responses for a
/// meaningful analysis)
#[derive(Debug, Clone)]
pub enum SelectOutcome {
    Ready(Snapshot),
    Insufficient {
        audit: SnapshotAudit,
        needed: usize,
    },
}

/// Select the eligible responses for `survey_id` at the `as_of` boundary.
///
/// Excludes spam-flagged responses and responses from users whose aggregate
/// trust is below the configured floor. Reports `Insufficient` when fewer
/// than `min_sample_size` responses remain.
pub async fn select_eligible(
    pool: &SqlitePool,
    survey_id: Uuid,
    as_of: DateTime<Utc>,
    config: &FilterConfig,
) -> Result<SelectOutcome> {
    let responses =
        db::responses::snapshot_eligible(pool, survey_id, as_of, config.trust_floor).await?;
    let total = db::responses::count_within_boundary(pool, survey_id, as_of).await?;

    let eligible_count = responses.len() as i64;
    let excluded_count = total - eligible_count;

    tracing::debug!(
        survey_id = %survey_id,
        as_of = %as_of,
        eligible = eligible_count,
        excluded = excluded_count,
        "Response snapshot selected"
    );

    if responses.len() < config.min_sample_size {
        return Ok(SelectOutcome::Insufficient {
            audit: SnapshotAudit {
                as_of,
                eligible_count,
                excluded_count,
            },
            needed: config.min_sample_size,
        });
    }

    Ok(SelectOutcome::Ready(Snapshot {
        survey_id,
        as_of,
        responses,
        eligible_count,
        excluded_count,
    }))
}
