//! Common error types for PhraseFind

use thiserror::Error;

/// Common result type for PhraseFind operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the PhraseFind crates
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique-key collision on insert. Stores surface this so callers can
    /// decide whether a duplicate is an error or an idempotent success.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Generic throttle denial. Carries the seconds until the window resets.
    #[error("Rate limited, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: i64 },

    /// Free-tier AI quota exhausted.
    #[error("Quota exceeded, retry in {retry_after_seconds}s")]
    QuotaExceeded { retry_after_seconds: i64 },

    /// Upstream provider unavailable (timeouts, 5xx, rate limits after retries).
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream rejected the request outright (400/401). Never retried.
    #[error("Upstream configuration error: {0}")]
    UpstreamAuth(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a sqlx error is a SQLite unique-constraint violation.
    ///
    /// SQLite reports these as error code 2067 (`SQLITE_CONSTRAINT_UNIQUE`)
    /// or 1555 (`SQLITE_CONSTRAINT_PRIMARYKEY`); the message always carries
    /// "UNIQUE constraint failed".
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => {
                db_err.message().contains("UNIQUE constraint failed")
            }
            _ => false,
        }
    }
}
