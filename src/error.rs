//! Error taxonomy.

use axum::http::StatusCode;
use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing request parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Market provider failure.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// Configuration error during startup.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database open or pragma setup failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Transaction exhausted its busy retries.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// Stored data violates an invariant (negative counter, orphaned
    /// reference, malformed value).
    #[error("data corruption: {0}")]
    Corruption(String),

    /// The applied diffs are inconsistent with the batch's transactions.
    #[error("missing spent output value: {0}")]
    MissingSpentOutput(String),

    /// Stats cannot be denominated without an exchange rate.
    #[error("no exchange rate data")]
    NoExchangeRate,

    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Market feed and provider errors. All variants are retryable; the feed
/// only advances its cursor on success.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned status {0}")]
    Status(u16),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status for this error when it surfaces on an API route.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::Storage(_) | Error::Market(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(StorageError::Sqlite(e))
    }
}
