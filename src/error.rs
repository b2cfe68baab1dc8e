use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any write (e.g. empty title). Never queued.
    #[error("validation error: {0}")]
    Validation(String),

    /// No connectivity, unreachable host, or timeout. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a 4xx/5xx status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The server answered with a body we could not decode.
    #[error("parse error: {0}")]
    Parse(String),

    /// Local durable store failure. Fatal to the current operation.
    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("task not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether a failed remote call may succeed if replayed later.
    /// Network failures and server-side (5xx) errors are retryable;
    /// 4xx responses will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::Parse(e.to_string())
        } else {
            // Connect failures, timeouts, and anything else transport-level.
            Error::Network(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
