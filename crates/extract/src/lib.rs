//! Turns EPUB archive bytes into books: metadata, numbered chapters and their
//! plain text.
//!
//! Everything in this crate is synchronous and CPU-bound; callers on an async
//! runtime should run it on a blocking thread.

pub mod archive;
mod chapters;
mod consts;
pub mod error;
mod href;
mod metadata;
pub mod models;
pub mod nav;
pub mod package;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod text;

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

pub use crate::archive::Archive;
pub use crate::chapters::ResolveOptions;
use crate::error::{ErrorKind, Result};
pub use crate::metadata::fallback_title;
use crate::models::{Book, Metadata};
pub use crate::text::{Normalized, normalize};

/// Reads only what listing needs: the package document's metadata.
///
/// `path` is the book's library path; it only supplies the fallback title.
///
/// # Errors
///
/// [`NotAnArchive`](ErrorKind::NotAnArchive),
/// [`ManifestMissing`](ErrorKind::ManifestMissing) or
/// [`ManifestMalformed`](ErrorKind::ManifestMalformed); see [`Archive::open()`].
#[instrument(level = "debug", skip(bytes), fields(size = bytes.len()))]
pub fn read_metadata(bytes: Vec<u8>, path: &Path) -> Result<Metadata> {
    let (_, package) = Archive::open(bytes)?;
    Ok(metadata::extract(&package.dublin_core, path))
}

/// Fully materializes a book: metadata plus resolved chapters and their text.
///
/// `cancel` is checked before each content document is ingested.
///
/// # Errors
///
/// Everything [`read_metadata()`] can fail with, plus
/// [`ContentDocumentMissing`](ErrorKind::ContentDocumentMissing) and
/// [`Cancelled`](ErrorKind::Cancelled).
#[instrument(skip(bytes, options, cancel), fields(size = bytes.len(), chapters))]
pub fn read_book(bytes: Vec<u8>, path: &Path, options: &ResolveOptions, cancel: &CancellationToken) -> Result<Book> {
    if cancel.is_cancelled() {
        exn::bail!(ErrorKind::Cancelled);
    }
    let (mut archive, package) = Archive::open(bytes)?;
    let metadata = metadata::extract(&package.dublin_core, path);
    let (chapters, diagnostics) = chapters::resolve(&mut archive, &package, options, cancel)?;
    tracing::Span::current().record("chapters", chapters.len());
    tracing::debug!(diagnostics = diagnostics.len(), "Book resolved");
    Ok(Book { metadata, chapters, diagnostics })
}
