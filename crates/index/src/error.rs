//! Index Error Types
//!
//! Storage and extraction failures are re-raised as index errors, keeping the
//! original error as a child in the error tree.

use derive_more::{Display, Error};
use folio_extract::error::{Error as ExtractError, ErrorKind as ExtractErrorKind};
use folio_storage::error::{Error as StorageError, ErrorKind as StorageErrorKind};
use std::path::PathBuf;

/// An index error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No file at this library path
    #[display("book not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The path escapes the library root
    #[display("path outside library: {}", _0.display())]
    Forbidden(#[error(not(source))] PathBuf),
    /// The file is not an EPUB
    #[display("unsupported format: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    /// Reading the file failed
    #[display("storage error: {_0}")]
    Storage(#[error(not(source))] String),
    /// The file was read but could not be turned into a book
    #[display("{_0}")]
    Extract(ExtractErrorKind),
    /// An ingestion task died without producing a result
    #[display("ingestion task failed: {_0}")]
    Internal(#[error(not(source))] String),
}

impl ErrorKind {
    /// Convert a storage error into an index error, keeping the storage
    /// crate's `Exn` frame as a child in the error tree.
    #[track_caller]
    pub fn storage(err: StorageError) -> Error {
        let kind = match &*err {
            StorageErrorKind::NotFound(path) => Self::NotFound(path.clone()),
            StorageErrorKind::InvalidPath(path) => Self::Forbidden(path.clone()),
            StorageErrorKind::UnsupportedFormat(path) => Self::UnsupportedFormat(path.clone()),
            other => Self::Storage(other.to_string()),
        };
        err.raise(kind)
    }

    /// Convert an extraction error into an index error, keeping the extract
    /// crate's `Exn` frame as a child in the error tree.
    #[track_caller]
    pub fn extract(err: ExtractError) -> Error {
        let inner = (*err).clone();
        err.raise(Self::Extract(inner))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
