//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid conflict strategy: {0}")]
    InvalidStrategy(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
