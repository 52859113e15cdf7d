//! Error types for module execution.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Boxed error returned by a provisioning check.
pub type CheckError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while staging or executing a module.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Staging failed: {0}")]
    Staging(String),

    #[error("Terraform {command} failed with exit code {exit_code}: {output}")]
    CommandFailed {
        command: String,
        exit_code: i64,
        output: String,
    },

    #[error("Required output '{0}' is missing")]
    MissingOutput(String),

    #[error("Invalid terraform output: {0}")]
    InvalidOutput(String),

    #[error("Invalid input variable: {0}")]
    InvalidVariable(String),

    #[error("Provisioning check failed: {0}")]
    Check(CheckError),

    #[error("Runner error: {0}")]
    Runner(#[from] tfprobe_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
