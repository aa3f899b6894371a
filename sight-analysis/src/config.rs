//! Configuration for sight-analysis
//!
//! Multi-tier resolution with CLI > ENV > TOML > compiled default priority.
//! All numeric thresholds in the scoring/filter/scheduler sections are policy
//! defaults, tunable per deployment.

use serde::{Deserialize, Serialize};
use sight_common::config::{config_file_path, env_override, read_toml_config};
use sight_common::Result;
use std::path::{Path, PathBuf};
use tracing::info;

/// Full service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Bind address, e.g. "127.0.0.1:8000"
    pub bind_addr: String,
    /// SQLite database path; ":memory:" for tests
    pub database_path: String,
    /// HS256 secret for bearer token validation
    pub jwt_secret: String,
    pub scheduler: SchedulerConfig,
    pub provider: ProviderConfig,
    pub filter: FilterConfig,
    pub scoring: ScoringConfig,
}

/// Worker pool and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of concurrent analysis workers
    pub worker_count: usize,
    /// Capacity of the pending-job queue
    pub queue_capacity: usize,
    /// Maximum provider attempts per job (includes the first)
    pub max_attempts: u32,
    /// Initial retry backoff in milliseconds, doubled per attempt
    pub backoff_initial_ms: u64,
    /// Backoff ceiling in milliseconds
    pub backoff_cap_ms: u64,
}

/// External analysis capability endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub url: String,
    /// Hard timeout per provider call, in seconds
    pub timeout_secs: u64,
    pub api_key: Option<String>,
}

/// Response snapshot eligibility policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Minimum eligible responses for a meaningful analysis
    pub min_sample_size: usize,
    /// Responses from users below this aggregate trust are excluded
    pub trust_floor: f64,
}

/// Trust scorer thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Minimum plausible seconds per answered question
    pub min_seconds_per_question: f64,
    /// Flag when one normalized answer value covers this share of answers
    pub dominant_answer_share: f64,
    /// Flag when this share of answers comes from the low-effort token set
    pub low_effort_share: f64,
    /// Known low-effort tokens, compared case-insensitively
    pub low_effort_tokens: Vec<String>,
    /// Trust penalty applied to spam responses (positive magnitude)
    pub spam_penalty: f64,
    /// Maximum trust increment for a complete, non-spam response
    pub max_trust_increment: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            database_path: "sight.db".to_string(),
            jwt_secret: String::new(),
            scheduler: SchedulerConfig::default(),
            provider: ProviderConfig::default(),
            filter: FilterConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
            max_attempts: 3,
            backoff_initial_ms: 500,
            backoff_cap_ms: 30_000,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9400/analyze".to_string(),
            timeout_secs: 60,
            api_key: None,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 5,
            trust_floor: 30.0,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_seconds_per_question: 3.0,
            dominant_answer_share: 0.8,
            low_effort_share: 0.5,
            low_effort_tokens: ["test", "ok", "idk", "asdf", "هههه"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            // Materially larger than any single positive increment, so spam
            // cannot be offset by volume.
            spam_penalty: 0.7,
            max_trust_increment: 0.1,
        }
    }
}

impl AnalysisConfig {
    /// Load configuration: TOML file (if any), then environment overrides
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_file_path("sight-analysis", explicit_path) {
            Some(path) => {
                info!("Loading config from {}", path.display());
                read_toml_config(&path)?
            }
            None => {
                info!("No config file found, using compiled defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_override("SIGHT_ANALYSIS_BIND") {
            self.bind_addr = v;
        }
        if let Some(v) = env_override("SIGHT_ANALYSIS_DB") {
            self.database_path = v;
        }
        if let Some(v) = env_override("SIGHT_JWT_SECRET") {
            self.jwt_secret = v;
        }
        if let Some(v) = env_override("SIGHT_PROVIDER_URL") {
            self.provider.url = v;
        }
        if let Some(v) = env_override("SIGHT_PROVIDER_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.provider.timeout_secs = secs;
            }
        }
    }

    /// Validate settings that have no usable default
    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.trim().is_empty() {
            return Err(sight_common::Error::Config(
                "JWT secret not configured. Set SIGHT_JWT_SECRET or jwt_secret in \
                 ~/.config/sight/sight-analysis.toml"
                    .to_string(),
            ));
        }
        if self.scheduler.worker_count == 0 {
            return Err(sight_common::Error::Config(
                "scheduler.worker_count must be at least 1".to_string(),
            ));
        }
        if self.scheduler.max_attempts == 0 {
            return Err(sight_common::Error::Config(
                "scheduler.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Database path as a PathBuf (":memory:" stays special-cased by sqlx)
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path)
    }
}
