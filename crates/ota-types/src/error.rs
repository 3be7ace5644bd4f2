use std::fmt;

use thiserror::Error;

/// Recoverable failure kinds surfaced to the calling layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    Expired,
    Invalid,
}

impl ErrorCode {
    /// Transport status the calling layer maps this kind to.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::AlreadyExists => 409,
            ErrorCode::Expired => 401,
            ErrorCode::Invalid => 400,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NotFound => "NotFound",
            ErrorCode::AlreadyExists => "AlreadyExists",
            ErrorCode::Expired => "Expired",
            ErrorCode::Invalid => "Invalid",
        };
        f.write_str(name)
    }
}

/// Errors produced by entity store operations.
///
/// The first four variants are recoverable and carry an optional
/// human-readable message. `Integrity` signals a corrupted index (a child
/// whose recorded parent does not match the caller's) and is never a policy
/// decision; no retry is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("{}", describe("not found", .0))]
    NotFound(Option<String>),

    #[error("{}", describe("already exists", .0))]
    AlreadyExists(Option<String>),

    #[error("{}", describe("expired", .0))]
    Expired(Option<String>),

    #[error("{}", describe("invalid parameter", .0))]
    Invalid(Option<String>),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("blob store error: {0}")]
    Blob(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

fn describe(kind: &str, message: &Option<String>) -> String {
    match message {
        Some(m) => format!("{kind}: {m}"),
        None => kind.to_string(),
    }
}

impl StorageError {
    pub fn not_found() -> Self {
        StorageError::NotFound(None)
    }

    pub fn already_exists() -> Self {
        StorageError::AlreadyExists(None)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        StorageError::Invalid(Some(message.into()))
    }

    /// The recoverable kind, or `None` for integrity and backend faults.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            StorageError::NotFound(_) => Some(ErrorCode::NotFound),
            StorageError::AlreadyExists(_) => Some(ErrorCode::AlreadyExists),
            StorageError::Expired(_) => Some(ErrorCode::Expired),
            StorageError::Invalid(_) => Some(ErrorCode::Invalid),
            _ => None,
        }
    }

    /// The caller-facing message attached to a recoverable failure.
    pub fn message(&self) -> Option<&str> {
        match self {
            StorageError::NotFound(m)
            | StorageError::AlreadyExists(m)
            | StorageError::Expired(m)
            | StorageError::Invalid(m) => m.as_deref(),
            _ => None,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.code().is_some()
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Result alias for entity store operations.
pub type StorageResult<T> = Result<T, StorageError>;
