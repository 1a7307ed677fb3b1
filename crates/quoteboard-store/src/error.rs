//! Error types for the quoteboard-store crate.
//!
//! All store operations return [`StoreError`] via [`StoreResult`].
//! Uses `thiserror` for ergonomic, zero-cost error definitions.
//!
//! Only a [`StoreError::Format`] surfaced during startup load is fatal;
//! every other variant is recoverable and surfaced to the caller for
//! user messaging or retry.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the quote store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced slot index or author has no corresponding live record.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The store has zero usable records for the requested operation.
    ///
    /// Also returned when random selection exhausts its retry bound
    /// without landing on a live record; callers treat both the same.
    #[error("no quotes available")]
    Empty,

    /// Reading or writing the snapshot file failed.
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot file exists but cannot be parsed into the expected
    /// shape. Fatal at startup: the store must not run on unknown state.
    #[error("snapshot format error: {0}")]
    Format(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl StoreError {
    /// Shorthand for a missing quote slot.
    pub(crate) fn quote_not_found(index: usize) -> Self {
        Self::NotFound {
            entity: "quote",
            id: index.to_string(),
        }
    }

    /// Shorthand for an author with no live quotes.
    pub(crate) fn author_not_found(author: &str) -> Self {
        Self::NotFound {
            entity: "author",
            id: author.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
