//! External analysis capability
//!
//! The semantic analysis itself is an opaque collaborator reached over
//! HTTP: it receives the snapshot corpus (question text + answer value,
//! grouped by response) and returns an insight, or fails. Timeouts are
//! enforced by the scheduler, not here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProviderConfig;
use crate::filter::Snapshot;
use sight_common::models::Question;

/// One (question, answer) pair in the corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusItem {
    pub question_text: String,
    pub answer_value: String,
}

/// Snapshot corpus sent to the provider, grouped by response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisCorpus {
    pub responses: Vec<Vec<CorpusItem>>,
}

impl AnalysisCorpus {
    /// Build the corpus from a snapshot, resolving question text by id.
    /// Answers to questions that no longer resolve are dropped.
    pub fn from_snapshot(snapshot: &Snapshot, questions: &[Question]) -> Self {
        let responses = snapshot
            .responses
            .iter()
            .map(|response| {
                response
                    .answers
                    .iter()
                    .filter_map(|answer| {
                        questions
                            .iter()
                            .find(|q| q.question_id == answer.question_id)
                            .map(|q| CorpusItem {
                                question_text: q.text.clone(),
                                answer_value: answer.value.clone(),
                            })
                    })
                    .collect()
            })
            .collect();

        Self { responses }
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

/// Insight produced by the analysis capability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

/// One derived correlation/observation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub title: String,
    pub detail: String,
    /// Strength in [0, 1], provider-defined
    #[serde(default)]
    pub strength: f64,
}

/// Provider failure, retried by the scheduler up to the attempt ceiling
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Provider returned status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Provider returned malformed payload: {0}")]
    Malformed(String),
}

/// The external analysis capability, as seen by the worker pool
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn analyze(&self, corpus: &AnalysisCorpus) -> Result<Insight, ProviderError>;
}

/// HTTP implementation posting the corpus as JSON
pub struct HttpAnalysisProvider {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpAnalysisProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl AnalysisProvider for HttpAnalysisProvider {
    async fn analyze(&self, corpus: &AnalysisCorpus) -> Result<Insight, ProviderError> {
        let mut request = self.client.post(&self.url).json(corpus);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        response
            .json::<Insight>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}
