/*!
 * Error types for the tinbox engine.
 *
 * Provider adapters report `ProviderError`, which knows whether a failure is worth
 * retrying. The engine folds per-unit failures into the checkpoint as `ErrorKind`
 * values and only surfaces job-level problems as `TranslationError`.
 */

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failure, persisted alongside failed units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The document could not be split under the chosen algorithm
    Segmentation,
    /// The model declined to translate the unit
    ProviderRefusal,
    /// The model output hit its length limit
    ProviderTruncation,
    /// Rate limit, timeout or network failure that outlived its retry budget
    TransientProvider,
    /// Credentials or model configuration are unusable
    TerminalProvider,
    /// A persisted checkpoint failed validation
    CheckpointCorruption,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Segmentation => "segmentation",
            Self::ProviderRefusal => "provider_refusal",
            Self::ProviderTruncation => "provider_truncation",
            Self::TransientProvider => "transient_provider",
            Self::TerminalProvider => "terminal_provider",
            Self::CheckpointCorruption => "checkpoint_corruption",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur when talking to a model provider
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// The provider is throttling us
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        /// Message returned by the API
        message: String,
        /// Server-suggested wait before retrying
        retry_after_secs: Option<u64>,
    },

    /// The request did not complete in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// The provider failed on its side (5xx, overloaded)
    #[error("API responded with error: {status_code} - {message}")]
    ServerError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error with authentication
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The requested model does not exist or is not available to this key
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// The request itself was rejected (4xx other than auth / rate limit)
    #[error("Invalid request: {status_code} - {message}")]
    InvalidRequest {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),
}

impl ProviderError {
    /// Whether the call may succeed if repeated after a pause
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Timeout(_)
                | Self::Connection(_)
                | Self::ServerError { .. }
                | Self::ParseError(_)
        )
    }

    /// Whether the failure makes every further call pointless
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::UnsupportedModel(_))
    }

    /// Map onto the job-level failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        if self.is_terminal() {
            ErrorKind::TerminalProvider
        } else {
            ErrorKind::TransientProvider
        }
    }

    /// Server-suggested delay, if any
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs, .. } => *retry_after_secs,
            _ => None,
        }
    }

    /// Classify an unsuccessful HTTP status
    pub fn from_status(status_code: u16, message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        let message = message.into();
        match status_code {
            429 => Self::RateLimited { message, retry_after_secs },
            408 => Self::Timeout(message),
            401 | 403 => Self::Authentication(message),
            404 => Self::UnsupportedModel(message),
            500..=599 => Self::ServerError { status_code, message },
            _ => Self::InvalidRequest { status_code, message },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_connect() || error.is_request() {
            Self::Connection(error.to_string())
        } else if error.is_decode() {
            Self::ParseError(error.to_string())
        } else if let Some(status) = error.status() {
            Self::from_status(status.as_u16(), error.to_string(), None)
        } else {
            Self::Connection(error.to_string())
        }
    }
}

/// Job-level errors raised by the translation engine
#[derive(Error, Debug)]
pub enum TranslationError {
    /// The document cannot be split; raised before any model call
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// Credentials or model are unusable; the job stops dispatching
    #[error("Terminal provider error: {0}")]
    TerminalProvider(ProviderError),

    /// The persisted checkpoint for a job failed validation
    #[error("Checkpoint for job {job_id} is corrupt: {reason}")]
    CheckpointCorruption {
        /// The job whose checkpoint failed to load
        job_id: String,
        /// What the validation found
        reason: String,
    },

    /// The checkpoint belongs to a different document or configuration
    #[error("Checkpoint for job {job_id} does not match this job ({field} differs)")]
    CheckpointMismatch {
        /// The job being resumed
        job_id: String,
        /// The first mismatching field
        field: String,
    },

    /// No checkpoint exists for the job being resumed
    #[error("No checkpoint found for job {0}")]
    CheckpointNotFound(String),

    /// The checkpoint store could not be read or written
    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    /// A unit failed while fail-fast mode was selected
    #[error("Unit {sequence_index} failed ({kind}): {message}")]
    FailFast {
        /// Failing unit
        sequence_index: usize,
        /// Failure classification
        kind: ErrorKind,
        /// Provider message
        message: String,
    },

    /// Invalid engine or job configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The background job task panicked or was aborted
    #[error("Job task failed: {0}")]
    JobPanicked(String),
}

impl TranslationError {
    /// Taxonomy kind of this error, when it has one
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Segmentation(_) => Some(ErrorKind::Segmentation),
            Self::TerminalProvider(_) => Some(ErrorKind::TerminalProvider),
            Self::CheckpointCorruption { .. } => Some(ErrorKind::CheckpointCorruption),
            Self::FailFast { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from translation
    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
