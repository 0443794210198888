//! Error types for each stage of a sync run.

use reqwest::StatusCode;

/// Failures while obtaining or restoring a session credential.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no cached session found")]
    NotFound,

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("rate limited by authentication service")]
    RateLimited,

    #[error("token cache error: {0}")]
    Cache(#[from] std::io::Error),
}

impl AuthError {
    /// Whether the interactive username/password login should be attempted.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, AuthError::NotFound | AuthError::InvalidCredentials(_))
    }
}

/// Failures talking to the activity API.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("HTTP {status}")]
    Http { status: StatusCode },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl UpstreamError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UpstreamError::Http { status } => Some(*status),
            UpstreamError::Network(e) => e.status(),
            UpstreamError::Decode(_) => None,
        }
    }
}

/// Failures reading or writing the activity CSV.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0} has no \"Activity ID\" column")]
    MissingIdColumn(String),
}

/// Anything that can end a sync run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Login failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to start async runtime: {0}")]
    Runtime(std::io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
