//! Extraction Error Types
//!
//! Errors raised while turning archive bytes into a [`Book`](crate::models::Book).
//! Anything recoverable (a broken navigation document, tag soup inside a
//! chapter) is reported as a diagnostic instead and never surfaces here.

use derive_more::{Display, Error};

/// An extraction error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bytes are not a zip container (or its central directory is corrupt).
    #[display("not a zip archive: {_0}")]
    NotAnArchive(#[error(not(source))] String),
    /// Neither `META-INF/container.xml` nor any `.opf` entry could be found.
    #[display("package manifest missing")]
    ManifestMissing,
    /// The container or package document is not usable XML.
    #[display("package manifest malformed: {_0}")]
    ManifestMalformed(#[error(not(source))] String),
    /// A spine document named by the manifest is not in the archive.
    #[display("content document missing from archive: {_0}")]
    ContentDocumentMissing(#[error(not(source))] String),
    /// An archive entry exists but could not be decompressed.
    #[display("corrupt archive entry: {_0}")]
    CorruptEntry(#[error(not(source))] String),
    /// Ingestion was cancelled before it finished.
    #[display("cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Archives are immutable input: the same bytes fail the same way.
        false
    }
}
