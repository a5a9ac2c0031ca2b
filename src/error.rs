use thiserror::Error;

/// Failures that surface to callers of the sync pipeline.
///
/// Soft fetch failures never show up here; adapters report them as absent
/// values and the aggregator turns them into skips.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A sync batch is already running")]
    Busy,
}

impl SyncError {
    /// True for errors caused by the caller's input rather than the pipeline
    pub fn is_client_error(&self) -> bool {
        matches!(self, SyncError::UnknownCategory(_))
    }

    /// HTTP-style status for a command that failed with this error
    pub fn status_code(&self) -> u16 {
        match self {
            SyncError::UnknownCategory(_) => 400,
            SyncError::Busy => 409,
            _ => 500,
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
