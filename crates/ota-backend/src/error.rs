/// Errors from key-value backend operations.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The backend did not answer (connection refused, timed out, offline).
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A hash command was issued against a plain value, or vice versa.
    #[error("wrong value type for key {key}")]
    WrongType { key: String },

    /// An increment targeted a field that does not hold an integer.
    #[error("hash field {key}.{field} is not an integer")]
    NotInteger { key: String, field: String },

    /// An increment would leave the `i64` range; the field is unchanged.
    #[error("increment or decrement would overflow {key}.{field}")]
    Overflow { key: String, field: String },

    /// The connection has been closed by its owner.
    #[error("connection closed")]
    Closed,
}

/// Result alias for key-value operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No blob is stored under this id.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// The stream ended before (or after) the declared length.
    #[error("blob {id} length mismatch: declared {declared}, received {received}")]
    LengthMismatch {
        id: String,
        declared: u64,
        received: u64,
    },

    /// I/O error while reading the upload stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The object storage provider rejected or failed the request.
    #[error("blob backend error: {0}")]
    Backend(String),
}

/// Result alias for blob operations.
pub type BlobResult<T> = Result<T, BlobError>;
