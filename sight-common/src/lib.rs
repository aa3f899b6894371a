//! # Sight Common Library
//!
//! Shared code for the Sight survey platform services including:
//! - Error taxonomy and result type
//! - Domain models (surveys, questions, responses)
//! - Configuration loading (TOML + environment overrides)

pub mod config;
pub mod error;
pub mod models;

pub use error::{Error, Result};
