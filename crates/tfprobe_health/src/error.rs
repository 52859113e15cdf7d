//! Error types for health validation.

use thiserror::Error;

/// Result type alias for health operations.
pub type HealthResult<T> = Result<T, HealthError>;

/// Errors that can occur while checking resource health.
#[derive(Error, Debug)]
pub enum HealthError {
    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Invalid credential configuration: {0}")]
    InvalidCredential(String),

    #[error("Resource health query failed: {0}")]
    HealthQuery(String),

    #[error("Resource health query timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Core(#[from] tfprobe_core::CoreError),

    #[error("Runner error: {0}")]
    Runner(#[from] tfprobe_runner::RunnerError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
