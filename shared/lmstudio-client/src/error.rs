use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for backend operations
pub type LmStudioResult<T> = Result<T, LmStudioError>;

/// Error types for backend operations
#[derive(Debug, Error)]
pub enum LmStudioError {
    /// Pull was asked for an empty model identifier
    #[error("model identifier is empty")]
    EmptyIdentifier,

    /// Delete was asked for an empty model ID
    #[error("model ID is empty")]
    EmptyModelId,

    /// The configured daemon base URL does not parse
    #[error("invalid LM Studio base URL '{url}': {reason}")]
    BaseUrl {
        /// URL as configured
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// The daemon reported no publisher and the model ID carries no
    /// `publisher/` prefix to derive one from
    #[error("unable to determine publisher of model {model_id}")]
    UnknownPublisher {
        /// Model ID as reported by the daemon
        model_id: String,
    },

    /// The daemon reported a publisher or model ID that would resolve
    /// outside the models directory
    #[error("unsafe model path component '{component}'")]
    UnsafeModelPath {
        /// Publisher or model ID as reported by the daemon
        component: String,
    },

    /// The daemon could not be reached, or the transport failed mid-call
    #[error("error calling LM Studio: {0}")]
    Http(#[from] reqwest::Error),

    /// The daemon answered with a non-success status where one is required
    #[error("LM Studio returned {status}: {body}")]
    Api {
        /// HTTP status the daemon returned
        status: u16,
        /// Response body text
        body: String,
    },

    /// The daemon CLI could not be started, or exited non-zero
    #[error("failed to execute 'lms {command}': {reason}")]
    Cli {
        /// Subcommand and arguments, e.g. `get acme/foo`
        command: String,
        /// Spawn error or exit status description
        reason: String,
        /// Combined stdout/stderr captured before the failure
        output: String,
    },

    /// The model directory the daemon pointed at does not exist
    #[error("model directory not found: {}", .dir.display())]
    ModelDirNotFound {
        /// Resolved model directory
        dir: PathBuf,
    },

    /// Filesystem failure while checking or removing the model directory
    #[error("error {} model directory {}: {}", .action, .dir.display(), .source)]
    Io {
        /// What was being attempted, `checking` or `removing`
        action: &'static str,
        /// Resolved model directory
        dir: PathBuf,
        /// Underlying filesystem error
        #[source]
        source: std::io::Error,
    },

    /// The daemon's model info response was not valid JSON
    #[error("error decoding model info response: {0}")]
    InvalidInfoResponse(#[from] serde_json::Error),
}

impl LmStudioError {
    /// HTTP status attached to the failure, when the call got far enough to
    /// produce one.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// Combined CLI output captured before the failure.
    #[must_use]
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::Cli { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Model directory the failure refers to, when resolution got that far.
    #[must_use]
    pub fn model_dir(&self) -> Option<&Path> {
        match self {
            Self::ModelDirNotFound { dir } | Self::Io { dir, .. } => Some(dir),
            _ => None,
        }
    }
}
