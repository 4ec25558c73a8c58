//! Error types for Blockscope

use std::fmt;
use thiserror::Error;

/// Failures raised by a chain store backend.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Chain has no head block")]
    EmptyChain,
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::DatabaseError(err.to_string())
    }
}

/// The identifier a failed lookup was attempted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// Hash text exactly as the caller supplied it.
    Hash(String),
    Sequence(i64),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Hash(hash) => write!(f, "hash {}", hash),
            Identifier::Sequence(sequence) => write!(f, "sequence {}", sequence),
        }
    }
}

/// Coarse classification used at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Errors returned by the block resolver.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{message}")]
    NotFound {
        identifier: Identifier,
        message: String,
    },
    /// A header exists but its block body does not.
    #[error("No block with header {hash}")]
    MissingBlock { hash: String },
    #[error(transparent)]
    Store(#[from] ChainError),
}

impl ResolveError {
    pub fn not_found(identifier: Identifier) -> Self {
        let message = format!("No block found with {}", identifier);
        ResolveError::NotFound {
            identifier,
            message,
        }
    }

    /// A missing block body is indistinguishable from an absent block to
    /// callers, so it shares the `NotFound` kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ResolveError::NotFound { .. } | ResolveError::MissingBlock { .. } => {
                ErrorKind::NotFound
            }
            ResolveError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
