//! Catalog error types.

use thiserror::Error;

/// Catalog operation errors.
///
/// Every producer tags its error so the HTTP layer can map kinds to status
/// codes without string matching.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("name conflict: {0}")]
    NameConflict(String),

    #[error("bad target: {0}")]
    BadTarget(String),

    #[error("cycle forbidden: {0}")]
    CycleForbidden(String),

    #[error("digest collision on {digest}: stored size {stored}, claimed size {claimed}")]
    DigestCollision {
        digest: String,
        stored: i64,
        claimed: i64,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for catalog operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
