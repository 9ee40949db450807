//! Error types for Semaphore.

use thiserror::Error;

/// Common error type for Semaphore.
#[derive(Error, Debug)]
pub enum SemaphoreError {
    /// Database error.
    ///
    /// Errors from sqlx are automatically converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// Database connection error.
    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A conditional write lost against a concurrent writer.
    #[error("edit conflict")]
    EditConflict,

    /// A single-row insert collided with an existing unique key.
    #[error("{0} already exists")]
    Duplicate(String),

    /// Client-supplied pagination cursor could not be decoded.
    #[error("invalid cursor")]
    InvalidCursor,

    /// Client-supplied pagination session id could not be decoded.
    #[error("invalid session id")]
    InvalidSession,

    /// Feed fetch or parse failure.
    #[error("feed error: {0}")]
    Feed(String),

    /// An operation exceeded its time bound.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Pagination session cache failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SemaphoreError {
    /// Whether the error was caused by caller input rather than a server-side fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SemaphoreError::Validation(_)
                | SemaphoreError::NotFound(_)
                | SemaphoreError::InvalidCursor
                | SemaphoreError::InvalidSession
        )
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for SemaphoreError {
    fn from(e: sqlx::Error) -> Self {
        SemaphoreError::Database(e.to_string())
    }
}

/// Returns true if the sqlx error is a unique-constraint violation.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Returns true if the sqlx error is a foreign-key violation.
pub(crate) fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.is_foreign_key_violation(),
        _ => false,
    }
}

/// Result type alias for Semaphore operations.
pub type Result<T> = std::result::Result<T, SemaphoreError>;
