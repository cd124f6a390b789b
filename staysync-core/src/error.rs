//! Error types for the staysync engine.

use thiserror::Error;

/// Errors that can occur in staysync operations.
#[derive(Error, Debug)]
pub enum StaySyncError {
    #[error("end must be strictly after start")]
    InvalidInterval,

    #[error("Winner must be one of the conflicting events")]
    InvalidWinner,

    #[error("Imported events must originate from a channel")]
    InvalidSource,

    #[error("Event {0} referenced by a conflict is missing from storage")]
    MissingEvent(i64),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Feed fetch failed: {0}")]
    FeedFetch(String),

    #[error("Feed entry has no usable DTSTART/DTEND")]
    MissingSpan,

    #[error("Unknown timezone: {0}")]
    Timezone(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for StaySyncError {
    fn from(err: rusqlite::Error) -> Self {
        StaySyncError::Store(err.to_string())
    }
}

/// Result type alias for staysync operations.
pub type StaySyncResult<T> = Result<T, StaySyncError>;
