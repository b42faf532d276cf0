//! Common error types for SPR

use thiserror::Error;

/// Common result type for SPR operations
pub type Result<T> = std::result::Result<T, Error>;

/// SQLite primary result codes for lock contention
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

/// Common error types across the pipeline crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Payload could not be canonicalized for hashing
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Lock retries exhausted; the operation may be retried later
    #[error("Storage contention: {0}")]
    Contention(String),

    /// Ingestion run state machine violation
    #[error("Invalid run transition for {run_id}: run is already {current}")]
    InvalidTransition { run_id: String, current: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures that clear up on their own (busy/locked storage)
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Contention(_) => true,
            Error::Database(db_err) => is_lock_error(db_err),
            _ => false,
        }
    }

    /// True when the failure belongs to one record rather than the whole batch
    pub fn is_record_level(&self) -> bool {
        matches!(self, Error::MalformedPayload(_) | Error::InvalidInput(_)) || self.is_transient()
    }
}

/// Detect SQLITE_BUSY / SQLITE_LOCKED, including extended result codes
pub fn is_lock_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let code_matches = db_err
                .code()
                .map(|code| {
                    let primary = code
                        .parse::<i64>()
                        .map(|c| (c & 0xff).to_string())
                        .unwrap_or_else(|_| code.to_string());
                    primary == SQLITE_BUSY || primary == SQLITE_LOCKED
                })
                .unwrap_or(false);
            code_matches || db_err.message().contains("database is locked")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}
