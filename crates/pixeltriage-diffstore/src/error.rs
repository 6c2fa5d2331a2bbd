use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiffStoreError>;

/// DiffStore-specific error kinds (spec §7). `DownloadMismatch` and
/// repeated decode failure both fold into marking the digest unavailable
/// rather than being returned to the caller directly — see
/// [`crate::diffstore::DiffStore::mark_unavailable`].
#[derive(Debug, Error)]
pub enum DiffStoreError {
    #[error("digest {0} could not be downloaded from the object store")]
    Download(String),

    #[error("digest {0} checksum mismatch after {1} attempts")]
    DownloadMismatch(String, u32),

    #[error("digest {0} could not be decoded as an image")]
    Decode(String),

    #[error("digest {0} is known unavailable")]
    Unavailable(String),

    #[error("object not found: {bucket}/{path}")]
    ObjectNotFound { bucket: String, path: String },

    #[error("operation cancelled or deadline exceeded")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<DiffStoreError> for pixeltriage_core::Error {
    fn from(e: DiffStoreError) -> Self {
        match e {
            DiffStoreError::Cancelled => Self::CancelledOrDeadline,
            DiffStoreError::Io(err) => Self::Io(err),
            DiffStoreError::Serialization(err) => Self::Serialization(err),
            DiffStoreError::Decode(_) | DiffStoreError::Unavailable(_) => Self::Corruption(e.to_string()),
            DiffStoreError::Download(_) | DiffStoreError::DownloadMismatch(..) | DiffStoreError::ObjectNotFound { .. } => {
                Self::BackendTransient { batch: e.to_string(), source: Box::new(e) }
            }
        }
    }
}
