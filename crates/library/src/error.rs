//! Library Error Types
//!
//! This is the error taxonomy callers of [`Library`](crate::Library) see.
//! Index, storage and extraction errors are re-raised into it, keeping the
//! original error as a child in the error tree.

use derive_more::{Display, Error};
use folio_extract::error::ErrorKind as ExtractErrorKind;
use folio_index::error::{Error as IndexError, ErrorKind as IndexErrorKind};
use std::path::PathBuf;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The file is not a zip archive (or is a broken one)
    #[display("not an EPUB archive: {_0}")]
    NotAnArchive(#[error(not(source))] String),
    /// The archive has no package document
    #[display("EPUB has no package document")]
    ManifestMissing,
    /// The package document could not be parsed
    #[display("malformed package document: {_0}")]
    ManifestMalformed(#[error(not(source))] String),
    /// The spine references a document missing from the archive
    #[display("content document missing from archive: {_0}")]
    ContentDocumentMissing(#[error(not(source))] String),
    /// The path does not name an `.epub` file
    #[display("unsupported format: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    #[display("book not found: {}", _0.display())]
    BookNotFound(#[error(not(source))] PathBuf),
    /// The path resolves outside the library root
    #[display("path outside library: {}", _0.display())]
    PathForbidden(#[error(not(source))] PathBuf),
    #[display("chapter {number} out of range (book has {count} chapters)")]
    ChapterOutOfRange { number: usize, count: usize },
    #[display("invalid chapter range {start}..={end} (book has {count} chapters)")]
    InvalidRange { start: usize, end: usize, count: usize },
    #[display("search query must not be empty")]
    InvalidQuery,
    /// Reading from the library failed
    #[display("storage error: {_0}")]
    Storage(#[error(not(source))] String),
    #[display("operation cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Convert an index error into a library error, keeping the index
    /// crate's `Exn` frame as a child in the error tree.
    #[track_caller]
    pub fn index(err: IndexError) -> Error {
        let kind = match &*err {
            IndexErrorKind::NotFound(path) => Self::BookNotFound(path.clone()),
            IndexErrorKind::Forbidden(path) => Self::PathForbidden(path.clone()),
            IndexErrorKind::UnsupportedFormat(path) => Self::UnsupportedFormat(path.clone()),
            IndexErrorKind::Storage(message) | IndexErrorKind::Internal(message) => Self::Storage(message.clone()),
            IndexErrorKind::Extract(inner) => match inner {
                ExtractErrorKind::NotAnArchive(message) | ExtractErrorKind::CorruptEntry(message) => {
                    Self::NotAnArchive(message.clone())
                },
                ExtractErrorKind::ManifestMissing => Self::ManifestMissing,
                ExtractErrorKind::ManifestMalformed(message) => Self::ManifestMalformed(message.clone()),
                ExtractErrorKind::ContentDocumentMissing(path) => Self::ContentDocumentMissing(path.clone()),
                ExtractErrorKind::Cancelled => Self::Cancelled,
            },
        };
        err.raise(kind)
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
