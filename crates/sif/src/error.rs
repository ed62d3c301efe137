//! Error types for the sif library.

use crate::format::DataType;

/// Result type alias for operations that may return a [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by SIF container operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The image failed a magic, version or bounds check during load.
    #[error("invalid SIF image: {0}")]
    FormatInvalid(String),

    /// The descriptor table has no free slots.
    #[error("no descriptor slot available")]
    CapacityExceeded,

    /// No descriptor matched the supplied selector.
    #[error("object not found")]
    ObjectNotFound,

    /// More than one descriptor matched a selector that requires a unique
    /// match.
    #[error("multiple objects found")]
    MultipleObjectsFound,

    /// An object ID of zero was supplied.
    #[error("invalid object ID")]
    InvalidObjectId,

    /// A group ID of zero was supplied.
    #[error("invalid group ID")]
    InvalidGroupId,

    /// The image contains no object groups.
    #[error("no object groups found")]
    NoGroupsFound,

    /// The image contains no data objects.
    #[error("no data objects found")]
    NoObjects,

    /// A typed operation was invoked on a descriptor of the wrong data type.
    #[error("unexpected data type {got:?}, expected {want:?}")]
    UnexpectedDataType {
        /// The data type the operation requires.
        want: &'static [DataType],
        /// The data type of the descriptor.
        got: DataType,
    },

    /// A primary system partition is already present.
    #[error("primary system partition already exists")]
    PrimaryPartitionExists,

    /// The architecture name is not in the supported set.
    #[error("unknown architecture: {0}")]
    UnknownArchitecture(String),

    /// The container was already unloaded.
    #[error("image already unloaded")]
    AlreadyUnloaded,

    /// The container was opened read-only.
    #[error("image opened read-only")]
    ReadOnly,

    /// The launch script exceeds the fixed launch region.
    #[error("launch script too long: {len} bytes > {limit} bytes")]
    LaunchScriptTooLong {
        /// Actual script length.
        len: usize,
        /// Fixed region width.
        limit: usize,
    },

    /// An object name exceeds the fixed name field.
    #[error("object name too long: {len} bytes > {limit} bytes")]
    NameTooLong {
        /// Actual name length.
        len: usize,
        /// Fixed field width.
        limit: usize,
    },

    /// Encoded metadata exceeds the fixed extra field.
    #[error("metadata too large: {len} bytes > {limit} bytes")]
    MetadataTooLarge {
        /// Encoded metadata length.
        len: usize,
        /// Fixed field width.
        limit: usize,
    },

    /// A requested store size is smaller than the object payload.
    #[error("store size {store} smaller than object size {size}")]
    InvalidStoreSize {
        /// Requested size with padding.
        store: u64,
        /// Actual payload size.
        size: u64,
    },

    /// I/O error from the underlying store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of extra metadata failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
