//! Error types for prescale.
//!
//! Configuration errors are fatal at startup. Collaborator errors are
//! transient: the control loop logs them and treats the tick as a no-op.

use std::time::Duration;

use thiserror::Error;

use crate::http::HttpError;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type alias for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Failures reported by the metric backend, the cluster control plane,
/// the forecaster, or the notification/telemetry sinks.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invalid replica target {target}: {reason}")]
    InvalidTarget { target: u32, reason: String },

    #[error("no data: {0}")]
    NoData(String),

    #[error("no running instances")]
    NoInstances,

    #[error("forecaster training failed: {0}")]
    TrainingFailed(String),

    #[error("forecaster inference failed: {0}")]
    InferenceFailed(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl From<HttpError> for CollaboratorError {
    fn from(err: HttpError) -> Self {
        Self::BackendUnavailable(err.to_string())
    }
}
