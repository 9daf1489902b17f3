//! Crate-wide error taxonomy. See SPEC_FULL.md §7.

use thiserror::Error;

/// Every error kind this crate can raise, minus "method not implemented" —
/// that one has no runtime representation here; a missing trait impl is a
/// compile error, not a value.
#[derive(Debug, Error)]
pub enum Error {
    #[error("entry type '{0}' is not registered")]
    EntryTypeNotRegistered(String),

    #[error("no schedule entry found for key '{0}'")]
    EntryNotFound(String),

    #[error("cannot overwrite default entry '{0}'")]
    OverwriteDefaultEntry(String),

    #[error("maximum run iterations reached")]
    MaxIterationsReached,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
