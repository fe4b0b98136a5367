//! Domain-level error taxonomy for gradeflow.

use std::path::PathBuf;

/// Errors produced while reading the configuration record.
///
/// A configuration defect is never transient, so none of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path:?} is not valid JSON: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config file {path:?} must contain a JSON object")]
    NotAnObject { path: PathBuf },

    #[error("config file {path:?} is missing required field {field}")]
    MissingField { path: PathBuf, field: &'static str },

    #[error("field {field} in {path:?} must be a string")]
    NotAString { path: PathBuf, field: &'static str },

    #[error("field {field} in {path:?} must not be empty")]
    EmptyField { path: PathBuf, field: &'static str },
}

/// gradeflow pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum GradeflowError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("check failed: {0}")]
    CheckFailed(String),

    #[error("build error: {0}")]
    Build(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("notify error: {message}")]
    Notify {
        /// HTTP status returned by the control plane, if a response arrived.
        status: Option<u16>,
        message: String,
    },

    #[error("command error: {0}")]
    Command(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GradeflowError {
    /// Short, stable class name used in logs and run reports.
    pub fn class(&self) -> &'static str {
        match self {
            GradeflowError::Configuration(_) => "configuration",
            GradeflowError::CheckFailed(_) => "check_failed",
            GradeflowError::Build(_) => "build",
            GradeflowError::Publish(_) => "publish",
            GradeflowError::Notify { .. } => "notify",
            GradeflowError::Command(_) => "command",
            GradeflowError::InvalidSettings(_) => "invalid_settings",
            GradeflowError::Serialization(_) => "serialization",
            GradeflowError::Io(_) => "io",
        }
    }
}

/// Result type for gradeflow operations.
pub type Result<T> = std::result::Result<T, GradeflowError>;
