//! Error kinds for the ExpectationsStore (spec §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExpectationsError>;

#[derive(Debug, Error)]
pub enum ExpectationsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("read-only handle: {0}")]
    ReadOnly(String),

    #[error("backend transient error exhausted retries for batch {batch}: {source}")]
    BackendTransient {
        batch: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("stored document could not be decoded and was skipped: {0}")]
    Corruption(String),

    #[error("operation cancelled or deadline exceeded")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ExpectationsError> for pixeltriage_core::Error {
    fn from(e: ExpectationsError) -> Self {
        match e {
            ExpectationsError::NotFound(s) => Self::NotFound(s),
            ExpectationsError::ReadOnly(s) => Self::ReadOnly(s),
            ExpectationsError::BackendTransient { batch, source } => Self::BackendTransient { batch, source },
            ExpectationsError::Corruption(s) => Self::Corruption(s),
            ExpectationsError::Cancelled => Self::CancelledOrDeadline,
            ExpectationsError::Io(e) => Self::Io(e),
            ExpectationsError::Serialization(e) => Self::Serialization(e),
        }
    }
}
