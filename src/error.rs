//! Error taxonomy for the record store, migrations, and embedding providers.
//!
//! Callers match on the variant to decide handling: validation errors are caller bugs,
//! constraint errors are user-facing, storage and migration errors are fatal for the
//! operation (or for startup) and are never retried automatically.

use thiserror::Error;

/// Errors from record store and embedding index operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input: unknown table or column, bad filter, wrong vector length.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unique, foreign-key, check, or not-null violation reported by the engine.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The operation was cancelled cooperatively; partial results were discarded.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    /// Embedding provider failure surfaced through a store-level operation (search, reindex).
    #[error(transparent)]
    Provider(#[from] crate::embedding::ProviderError),
}

impl StoreError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, ref msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let detail = msg.clone().unwrap_or_else(|| code.to_string());
                tracing::debug!(%detail, "constraint violation");
                Self::Constraint(detail)
            }
            other => {
                tracing::error!(error = %other, "storage failure");
                Self::Storage(other)
            }
        }
    }
}

/// Fatal errors from the migration manager. Any of these must halt startup.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The supplied steps are not strictly ascending or contain version 0.
    #[error("invalid migration plan: {0}")]
    InvalidPlan(String),

    /// The persisted schema version could not be parsed.
    #[error("stored schema version is corrupt: {0:?}")]
    CorruptVersion(String),

    /// A step's action failed; its transaction was rolled back and the version is unchanged.
    #[error("migration to v{version} ({name}) failed: {source}")]
    StepFailed {
        version: u32,
        name: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Reading or writing migration bookkeeping failed.
    #[error("migration bookkeeping failed: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The step transaction could not begin or commit.
    #[error("migration aborted: {0}")]
    Aborted(String),
}

impl From<StoreError> for MigrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Storage(e) => Self::Storage(e),
            other => Self::Aborted(other.to_string()),
        }
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
