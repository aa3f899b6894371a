//! Trust scorer
//!
//! Pure classification of a single submitted response into a spam flag and
//! a signed trust impact. No side effects: the ingestion path persists the
//! verdict and updates the user's aggregate trust; the analysis worker only
//! reads the persisted flags.

use crate::config::ScoringConfig;
use sight_common::models::{Question, Response};
use sight_common::{Error, Result};
use std::collections::HashMap;
use uuid::Uuid;

/// Scorer output for one response
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrustVerdict {
    pub is_spam: bool,
    /// Signed adjustment to the user's aggregate trust
    pub trust_impact: f64,
}

/// Why a response was flagged, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamSignal {
    /// Completion faster than plausible for the question count
    ImplausibleDuration,
    /// One normalized answer value dominates the response
    LowDiversity,
    /// Answers drawn from the known low-effort token set
    LowEffortTokens,
}

/// Score a response against its survey's questions.
///
/// Deterministic: the same response and question set always produce the
/// same verdict. Fails with `InvalidInput` when the response references a
/// question outside the survey or carries a negative duration.
pub fn score(
    response: &Response,
    questions: &[Question],
    config: &ScoringConfig,
) -> Result<TrustVerdict> {
    if response.duration_ms < 0 {
        return Err(Error::InvalidInput(format!(
            "Response {} has negative duration ({} ms)",
            response.response_id, response.duration_ms
        )));
    }

    let known: HashMap<Uuid, &Question> =
        questions.iter().map(|q| (q.question_id, q)).collect();
    for answer in &response.answers {
        if !known.contains_key(&answer.question_id) {
            return Err(Error::InvalidInput(format!(
                "Answer references question {} not in survey {}",
                answer.question_id, response.survey_id
            )));
        }
    }

    let signals = spam_signals(response, config);
    let is_spam = !signals.is_empty();

    let trust_impact = if is_spam {
        -config.spam_penalty
    } else {
        positive_increment(response, questions, config)
    };

    Ok(TrustVerdict { is_spam, trust_impact })
}

/// Detect spam signals on a response (empty = clean)
pub fn spam_signals(response: &Response, config: &ScoringConfig) -> Vec<SpamSignal> {
    let mut signals = Vec::new();
    let answered = response.answers.len();
    if answered == 0 {
        return signals;
    }

    // Implausibly fast completion for the number of answered questions
    let min_plausible_ms = config.min_seconds_per_question * 1000.0 * answered as f64;
    if (response.duration_ms as f64) < min_plausible_ms {
        signals.push(SpamSignal::ImplausibleDuration);
    }

    let normalized: Vec<String> = response
        .answers
        .iter()
        .map(|a| a.value.trim().to_lowercase())
        .collect();

    // One short token answering most of the questions
    if answered >= 3 {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for value in &normalized {
            *counts.entry(value.as_str()).or_insert(0) += 1;
        }
        let dominant = counts.values().copied().max().unwrap_or(0);
        if dominant as f64 / answered as f64 >= config.dominant_answer_share {
            signals.push(SpamSignal::LowDiversity);
        }
    }

    // Known low-effort tokens ("ok", "idk", ...)
    let low_effort = normalized
        .iter()
        .filter(|v| {
            config
                .low_effort_tokens
                .iter()
                .any(|t| t.eq_ignore_ascii_case(v))
        })
        .count();
    if low_effort as f64 / answered as f64 >= config.low_effort_share {
        signals.push(SpamSignal::LowEffortTokens);
    }

    signals
}

/// Small positive increment for a clean response, scaled by how completely
/// the survey was answered
fn positive_increment(
    response: &Response,
    questions: &[Question],
    config: &ScoringConfig,
) -> f64 {
    if questions.is_empty() {
        return 0.0;
    }
    let completeness = (response.answers.len() as f64 / questions.len() as f64).min(1.0);
    config.max_trust_increment * completeness
}
