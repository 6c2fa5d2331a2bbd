//! Shared error kinds for the pixeltriage core (spec §7).
//!
//! Subsystem crates (`pixeltriage-expectations`, `pixeltriage-diffstore`,
//! `pixeltriage-tileindex`) define their own `thiserror` enums for
//! operation-specific detail, but every one of them can be converted into
//! this shared [`Error`] at a crate boundary so callers that hold
//! references across subsystems (e.g. the Analyzer holding an
//! `ExpectationsStore`) have one error type to match on.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds from spec §7, generalized across subsystems.
#[derive(Debug, Error)]
pub enum Error {
    // -----------------------------------------------------------------
    // Semantic errors — surfaced to the caller, never retried.
    // -----------------------------------------------------------------
    #[error("not found: {0}")]
    NotFound(String),

    #[error("read-only handle: {0}")]
    ReadOnly(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -----------------------------------------------------------------
    // Backend/network errors — retried inside the store layer; this
    // variant is only constructed after retries are exhausted.
    // -----------------------------------------------------------------
    #[error("backend transient error exhausted retries for batch {batch}: {source}")]
    BackendTransient {
        batch: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("stored document could not be decoded and was skipped: {0}")]
    Corruption(String),

    // -----------------------------------------------------------------
    // Cancellation — propagated as-is, loops exit promptly.
    // -----------------------------------------------------------------
    #[error("operation cancelled or deadline exceeded")]
    CancelledOrDeadline,

    // -----------------------------------------------------------------
    // I/O and serialization (ambient).
    // -----------------------------------------------------------------
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
