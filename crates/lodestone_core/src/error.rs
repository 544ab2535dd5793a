//! Error types for the Lodestone core.
//!
//! Every error maps to a `{domain, code}` pair for consumers that speak
//! the numeric contract (bindings, wire protocols). Internally everything
//! is a plain `Result`; the warn-on-error escalation is a test-suite aid
//! that turns surfaced errors into log warnings unless a fault is
//! expected.

use crate::global;
use lodestone_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error domains for the numeric error contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    /// Errors raised by the Lodestone engine itself.
    Lodestone,
    /// Faults from the storage layer or the OS.
    Storage,
    /// Query compilation and index errors.
    Query,
}

/// Stable error codes within a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// The requested record, key store or database does not exist.
    NotFound = 1,
    /// The resource is held open elsewhere.
    Busy = 2,
    /// A mutation was attempted outside a transaction.
    NotInTransaction = 3,
    /// The operation requires no transaction to be open.
    TransactionNotClosed = 4,
    /// The operation or argument combination is not supported.
    Unsupported = 5,
    /// The query AST is malformed or violates a planning rule.
    InvalidQuery = 6,
    /// No index matches the query expression.
    NoSuchIndex = 7,
    /// Stored data failed validation (checksum, framing, version bytes).
    CorruptData = 8,
    /// The database was opened read-only.
    NotWriteable = 9,
    /// Encryption or decryption failed, including a wrong key.
    CryptoError = 10,
    /// A caller-supplied argument is invalid.
    InvalidParameter = 11,
    /// The database handle has been closed.
    NotOpen = 12,
    /// An unclassified storage fault.
    StorageFault = 13,
}

/// Errors raised by the core.
#[derive(Debug, Error)]
pub enum Error {
    /// Record, key store or database not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The file is held open by another handle.
    #[error("busy: {0}")]
    Busy(String),

    /// A mutation was attempted with no transaction open.
    #[error("operation requires a transaction")]
    NotInTransaction,

    /// The operation is illegal while a transaction is open.
    #[error("operation not allowed inside a transaction")]
    TransactionNotClosed,

    /// Unsupported operation or argument.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Malformed query.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// No matching index.
    #[error("no such index: {0}")]
    NoSuchIndex(String),

    /// Corrupted persisted data.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// The database is read-only.
    #[error("database is not writeable")]
    NotWriteable,

    /// Encryption failure, including opening with the wrong key.
    #[error("crypto error: {0}")]
    CryptoError(String),

    /// Invalid caller argument.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The database handle is closed.
    #[error("database is closed")]
    NotOpen,

    /// A storage fault from the backend.
    #[error("storage fault: {0}")]
    Storage(StorageError),

    /// An I/O error from the OS.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a busy error.
    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy(message.into())
    }

    /// Creates an unsupported error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Creates an invalid-query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    /// Creates a no-such-index error.
    pub fn no_such_index(message: impl Into<String>) -> Self {
        Self::NoSuchIndex(message.into())
    }

    /// Creates a corrupt-data error.
    pub fn corrupt_data(message: impl Into<String>) -> Self {
        Self::CorruptData(message.into())
    }

    /// Creates a crypto error.
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::CryptoError(message.into())
    }

    /// Creates an invalid-parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    /// The domain this error belongs to.
    #[must_use]
    pub fn domain(&self) -> ErrorDomain {
        match self {
            Self::InvalidQuery(_) | Self::NoSuchIndex(_) => ErrorDomain::Query,
            Self::Storage(_) | Self::Io(_) => ErrorDomain::Storage,
            _ => ErrorDomain::Lodestone,
        }
    }

    /// The stable code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Busy(_) => ErrorCode::Busy,
            Self::NotInTransaction => ErrorCode::NotInTransaction,
            Self::TransactionNotClosed => ErrorCode::TransactionNotClosed,
            Self::Unsupported(_) => ErrorCode::Unsupported,
            Self::InvalidQuery(_) => ErrorCode::InvalidQuery,
            Self::NoSuchIndex(_) => ErrorCode::NoSuchIndex,
            Self::CorruptData(_) => ErrorCode::CorruptData,
            Self::NotWriteable => ErrorCode::NotWriteable,
            Self::CryptoError(_) => ErrorCode::CryptoError,
            Self::InvalidParameter(_) => ErrorCode::InvalidParameter,
            Self::NotOpen => ErrorCode::NotOpen,
            Self::Storage(_) | Self::Io(_) => ErrorCode::StorageFault,
        }
    }

    /// Applies the warn-on-error escalation and returns the error.
    ///
    /// When the global flag is set and no fault is currently expected,
    /// the error is logged as a warning before being returned. Call sites
    /// that surface errors to the public API route through here.
    #[must_use]
    pub fn surfaced(self) -> Self {
        if global::warn_on_error() && !global::expecting_faults() {
            tracing::warn!(code = ?self.code(), "surfaced error: {self}");
        }
        self
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Crypto(msg) => Self::CryptoError(msg),
            StorageError::Corrupt(msg) => Self::CorruptData(msg),
            other => Self::Storage(other),
        }
    }
}
