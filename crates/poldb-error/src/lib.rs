//! Error taxonomy for the poldb document store.
//!
//! Both storage engines surface the same small set of error kinds so that
//! callers can match on [`ErrorKind`] without caring which engine produced
//! the error. The engines never retry internally.

use thiserror::Error;

/// Primary error type for store operations.
///
/// Structured variants for the cases callers are expected to branch on,
/// free-form detail strings for the rest.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The addressed document (or policy) does not exist.
    #[error("storage error (code: not_found): {0}")]
    NotFound(String),

    /// A patch operation was malformed (e.g. `-` used outside the tail
    /// position of an array add).
    #[error("storage error (code: invalid_patch): {0}")]
    InvalidPatch(String),

    /// A transaction was misused: stale, write-through-read, or presented
    /// to a store it does not belong to.
    #[error("storage error (code: invalid_transaction): {0}")]
    InvalidTransaction(String),

    /// The root document cannot be removed.
    #[error("storage error (code: invalid_patch): root cannot be removed")]
    RootCannotBeRemoved,

    /// The root document can only be replaced with an object.
    #[error("storage error (code: invalid_patch): root must be object")]
    RootMustBeObject,

    /// Internal logic error (should never happen).
    #[error("storage error (code: internal): {0}")]
    Internal(String),
}

/// Stable error kinds used by callers for branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Document or policy not found.
    NotFound,
    /// Malformed patch operation.
    InvalidPatch,
    /// Transaction misuse.
    InvalidTransaction,
    /// Root removal attempted.
    RootCannotBeRemoved,
    /// Root replacement with a non-object.
    RootMustBeObject,
    /// Internal error.
    Internal,
}

impl StoreError {
    /// Map this error to its stable kind.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidPatch(_) => ErrorKind::InvalidPatch,
            Self::InvalidTransaction(_) => ErrorKind::InvalidTransaction,
            Self::RootCannotBeRemoved => ErrorKind::RootCannotBeRemoved,
            Self::RootMustBeObject => ErrorKind::RootMustBeObject,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error means the addressed document does not exist.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// The canonical not-found error for document reads.
    pub fn document_missing() -> Self {
        Self::NotFound("document does not exist".to_owned())
    }

    /// Create an invalid-patch error.
    pub fn invalid_patch(msg: impl Into<String>) -> Self {
        Self::InvalidPatch(msg.into())
    }

    /// Create an invalid-transaction error.
    pub fn invalid_transaction(msg: impl Into<String>) -> Self {
        Self::InvalidTransaction(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;
