//! Error taxonomy for grade registration.

use serde::Serialize;
use thiserror::Error;

use crate::directory::DirectoryError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Caller-supplied data is malformed or a business invariant is violated
    #[error("validation error: {0}")]
    Validation(String),

    /// Submitter is not allowed to grade the referenced enrollment
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Referenced enrollment, scale or evaluation type does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A downstream lookup failed or timed out
    #[error("dependency unavailable: {0}")]
    Transient(#[from] DirectoryError),

    /// Store write or read failed; propagated unchanged
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Machine-readable error kind reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    Transient,
    Store,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Authorization(_) => ErrorKind::Authorization,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Transient(_) => ErrorKind::Transient,
            Error::Store(_) => ErrorKind::Store,
        }
    }
}
