//! The error taxonomy returned by every fallible operation in the crate.
//!
//! Every variant carries its own `Display` message, which doubles as the
//! `strerror` table a caller would otherwise look up by error code.

use thiserror::Error;

/// Errors returned by the storage engine.
///
/// `prefix-request-fullkey` from the design is deliberately absent here: it
/// is a comparator protocol sentinel, not a surfaced error (see
/// [`crate::compare::PrefixOrdering`]).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("short write: expected {expected} bytes, wrote {got}")]
    ShortWrite { expected: usize, got: usize },

    #[error("invalid key size: {0}")]
    InvalidKeySize(usize),

    #[error("invalid page size: {0}")]
    InvalidPageSize(usize),

    #[error("database is already open")]
    DbAlreadyOpen,

    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid backend")]
    InvalidBackend,

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("invalid file header")]
    InvalidFileHeader,

    #[error("invalid file version")]
    InvalidFileVersion,

    #[error("key not found")]
    KeyNotFound,

    #[error("duplicate key")]
    DuplicateKey,

    #[error("integrity violated: {0}")]
    IntegrityViolated(&'static str),

    #[error("internal error: {0}")]
    InternalError(&'static str),

    #[error("database is read-only")]
    DbReadOnly,

    #[error("blob not found")]
    BlobNotFound,

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("failed to lock database file")]
    Lock(#[source] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Small, `Copy` error code mirroring [`Error`]'s variants without their
/// payloads (§6 `get_error`, §7 "returned as small integer codes; each has
/// a fixed human string"). [`Database::get_error`](crate::Database::get_error)
/// returns one of these; [`strerror`] maps it back to the fixed string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCode {
    Success,
    ShortRead,
    ShortWrite,
    InvalidKeySize,
    InvalidPageSize,
    DbAlreadyOpen,
    OutOfMemory,
    InvalidBackend,
    InvalidParameter,
    InvalidFileHeader,
    InvalidFileVersion,
    KeyNotFound,
    DuplicateKey,
    IntegrityViolated,
    InternalError,
    DbReadOnly,
    BlobNotFound,
    Io,
    Lock,
}

impl From<&Error> for ErrorCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::ShortRead { .. } => ErrorCode::ShortRead,
            Error::ShortWrite { .. } => ErrorCode::ShortWrite,
            Error::InvalidKeySize(_) => ErrorCode::InvalidKeySize,
            Error::InvalidPageSize(_) => ErrorCode::InvalidPageSize,
            Error::DbAlreadyOpen => ErrorCode::DbAlreadyOpen,
            Error::OutOfMemory => ErrorCode::OutOfMemory,
            Error::InvalidBackend => ErrorCode::InvalidBackend,
            Error::InvalidParameter(_) => ErrorCode::InvalidParameter,
            Error::InvalidFileHeader => ErrorCode::InvalidFileHeader,
            Error::InvalidFileVersion => ErrorCode::InvalidFileVersion,
            Error::KeyNotFound => ErrorCode::KeyNotFound,
            Error::DuplicateKey => ErrorCode::DuplicateKey,
            Error::IntegrityViolated(_) => ErrorCode::IntegrityViolated,
            Error::InternalError(_) => ErrorCode::InternalError,
            Error::DbReadOnly => ErrorCode::DbReadOnly,
            Error::BlobNotFound => ErrorCode::BlobNotFound,
            Error::Io(_) => ErrorCode::Io,
            Error::Lock(_) => ErrorCode::Lock,
        }
    }
}

/// The fixed human string for an [`ErrorCode`] (§6 `strerror`).
pub fn strerror(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Success => "success",
        ErrorCode::ShortRead => "short read",
        ErrorCode::ShortWrite => "short write",
        ErrorCode::InvalidKeySize => "invalid key size",
        ErrorCode::InvalidPageSize => "invalid page size",
        ErrorCode::DbAlreadyOpen => "database is already open",
        ErrorCode::OutOfMemory => "out of memory",
        ErrorCode::InvalidBackend => "invalid backend",
        ErrorCode::InvalidParameter => "invalid parameter",
        ErrorCode::InvalidFileHeader => "invalid file header",
        ErrorCode::InvalidFileVersion => "invalid file version",
        ErrorCode::KeyNotFound => "key not found",
        ErrorCode::DuplicateKey => "duplicate key",
        ErrorCode::IntegrityViolated => "integrity violated",
        ErrorCode::InternalError => "internal error",
        ErrorCode::DbReadOnly => "database is read-only",
        ErrorCode::BlobNotFound => "blob not found",
        ErrorCode::Io => "I/O error",
        ErrorCode::Lock => "failed to lock database file",
    }
}
