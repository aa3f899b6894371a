//! Data models for sight-analysis

pub mod job;

pub use job::{AnalysisJob, JobState, SnapshotAudit};
