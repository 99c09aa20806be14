//! Crate-wide error type.

use std::io;

use thiserror::Error;

use crate::query::errors::QueryError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SiftError>;

/// Top-level error type of the crate.
#[derive(Debug, Error)]
pub enum SiftError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Malformed JSON record or query.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Query construction or compilation failure.
    #[error("query error: {0}")]
    Query(#[from] QueryError),
    /// Archive data inconsistent with its schema.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// Requested item does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Caller-supplied value rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
