/// Errors from storage allocation, view creation, and materialization.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Fewer bytes were available than the storage record declares.
    #[error("storage {key} truncated: expected {expected} bytes, read {actual}")]
    Truncated {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// The storage was already filled; contents are written exactly once.
    #[error("storage {0} already materialized")]
    AlreadyMaterialized(String),

    /// A view window does not fit inside its root storage.
    #[error("view {view} [{offset}, {offset}+{len}) exceeds root {root} of {root_len} elements")]
    ViewOutOfBounds {
        view: String,
        root: String,
        offset: usize,
        len: usize,
        root_len: usize,
    },

    /// `element_count * element_size` does not fit in a `u64`.
    #[error("storage {key} size overflows: {element_count} elements")]
    SizeOverflow { key: String, element_count: usize },

    /// I/O error from the underlying reader.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
