//! Error types for Mediacast
//!
//! Two layers live here. The `thiserror` enums describe what went wrong in
//! a form suitable for `?` propagation, while [`ErrorKind`] is the small,
//! platform-neutral taxonomy that ends up in a `PublishResult`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workflow::JobState;

pub type Result<T> = std::result::Result<T, MediacastError>;

#[derive(Error, Debug)]
pub enum MediacastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobState,
        to: JobState,
    },
}

impl MediacastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            MediacastError::InvalidInput(_) | MediacastError::NotFound(_) => 3,
            MediacastError::Token(_) => 2,
            MediacastError::Platform(PlatformError::Authentication(_)) => 2,
            MediacastError::Platform(_) => 1,
            MediacastError::Config(_) => 1,
            MediacastError::Database(_) => 1,
            MediacastError::Serialization(_) | MediacastError::Io(_) => 1,
            MediacastError::InvalidTransition { .. } => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Stored row is corrupt: {0}")]
    Corrupt(String),
}

/// Credential lifecycle failures.
///
/// Cloneable so a single refresh result can be shared by every job that
/// awaited it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("No credential stored for account {0}")]
    Missing(String),

    #[error("Credential for account {account} expired or expires at {expires_at} and cannot be refreshed")]
    Expired {
        account: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Token rejected by platform: {0}")]
    Invalid(String),

    #[error("Credential store unavailable: {0}")]
    Store(String),
}

/// Adapter-boundary classification of platform failures.
///
/// Every adapter maps its provider-specific error payloads onto these
/// variants exactly once, so nothing downstream re-parses response text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("{0}")]
    Rejected(String),

    #[error("Container {container_id} was already published")]
    AlreadyPublished {
        container_id: String,
        post_id: Option<String>,
    },

    #[error("Unexpected response: {0}")]
    MalformedResponse(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl PlatformError {
    /// Whether the failed call may succeed if simply tried again
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Network(_) | PlatformError::RateLimit(_))
    }

    /// Project the error onto the shared taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlatformError::Authentication(_) => ErrorKind::TokenError,
            PlatformError::Network(_) | PlatformError::RateLimit(_) => {
                ErrorKind::TransientNetworkError
            }
            PlatformError::Rejected(_)
            | PlatformError::AlreadyPublished { .. }
            | PlatformError::MalformedResponse(_)
            | PlatformError::NotSupported(_) => ErrorKind::PlatformRejected,
        }
    }
}

/// Error kinds surfaced to callers in a `PublishResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credential missing, expired, or exchange failed. Re-authenticate.
    TokenError,
    /// Connection failure, timeout, 5xx or throttling after retries ran out.
    TransientNetworkError,
    /// Application-level rejection by the platform. Never retried.
    PlatformRejected,
    /// Asynchronous processing on the platform side failed.
    ProcessingFailed,
    /// Polling deadline passed. The remote outcome is unknown.
    Timeout,
    /// Caller aborted the job.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TokenError => "token_error",
            ErrorKind::TransientNetworkError => "transient_network_error",
            ErrorKind::PlatformRejected => "platform_rejected",
            ErrorKind::ProcessingFailed => "processing_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&TokenError> for ErrorKind {
    fn from(_: &TokenError) -> Self {
        ErrorKind::TokenError
    }
}
