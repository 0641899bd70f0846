use thiserror::Error;

/// How a failed load should be interpreted by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The input is not a recognized checkpoint.
    NotACheckpoint,
    /// Recognized, but truncated or internally inconsistent.
    Corrupt,
    /// Recognized, but uses a feature this loader does not implement.
    Unsupported,
    /// The underlying file could not be read.
    Io,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid magic number")]
    InvalidMagicNumber,

    #[error("invalid protocol version: {0}")]
    InvalidProtocolVersion(String),

    #[error("malformed persistent id: {0}")]
    MalformedPersistentId(String),

    #[error("unexpected persistent id type: {0}")]
    UnexpectedPersistentIdType(String),

    #[error("malformed storage record: {0}")]
    MalformedStorageRecord(String),

    #[error("malformed module record: {0}")]
    MalformedModuleRecord(String),

    #[error("malformed tensor record: {0}")]
    MalformedTensorRecord(String),

    #[error("invalid storage key list: {0}")]
    InvalidStorageKeys(String),

    #[error("storage object not found for key '{0}'")]
    UnknownStorageKey(String),

    #[error("storage block for '{key}' declares {declared} elements, record has {expected}")]
    BlockSizeMismatch {
        key: String,
        declared: u64,
        expected: u64,
    },

    #[error("class not found: {module}.{name}")]
    UnknownClass { module: String, name: String },

    #[error("tar archive has no '{0}' member")]
    TarMemberNotFound(String),

    #[error("tar member '{name}' declares {size} bytes, limit is {limit}")]
    TarMemberTooLarge { name: String, size: u64, limit: u64 },

    #[error("tar member '{name}' declares {declared} bytes but only {read} are present")]
    TarMemberTruncated { name: String, declared: u64, read: u64 },

    #[error("unsupported container format: {0}")]
    UnsupportedContainerFormat(String),

    #[error("module source check failed: {0}")]
    SourceMismatch(String),

    #[error("decode error: {0}")]
    Pickle(#[from] ckpt_pickle::PickleError),

    #[error("storage error: {0}")]
    Storage(#[from] ckpt_storage::StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    pub fn category(&self) -> ErrorCategory {
        use ckpt_pickle::PickleError;
        use ckpt_storage::StorageError;

        match self {
            Self::InvalidMagicNumber | Self::InvalidProtocolVersion(_) => ErrorCategory::NotACheckpoint,
            Self::UnsupportedContainerFormat(_) | Self::UnknownClass { .. } => ErrorCategory::Unsupported,
            Self::Pickle(PickleError::Unsupported(_)) => ErrorCategory::Unsupported,
            Self::Pickle(PickleError::Io(e)) | Self::Storage(StorageError::Io(e)) | Self::Io(e) => io_category(e),
            _ => ErrorCategory::Corrupt,
        }
    }
}

/// A stream that ends early is corrupt; every other read failure is I/O.
fn io_category(err: &std::io::Error) -> ErrorCategory {
    match err.kind() {
        std::io::ErrorKind::UnexpectedEof => ErrorCategory::Corrupt,
        _ => ErrorCategory::Io,
    }
}

pub type LoadResult<T> = Result<T, LoadError>;
