//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested change would break a build record invariant.
    #[error("rejected: {0}")]
    Rejected(#[from] minici_core::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be turned back into a build record.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl DbError {
    /// Whether retrying the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                // serialization_failure, deadlock_detected
                sqlx::Error::Database(db) => {
                    matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

impl From<DbError> for minici_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => minici_core::Error::NotFound(what),
            DbError::Rejected(inner) => inner,
            other => minici_core::Error::Persistence(other.to_string()),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
