//! Library-relative path validation.
//!
//! Every path handed to a backend is a caller-supplied string, so it gets
//! lexically normalized here before it is ever joined onto the library root.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Normalizes a library-relative path, rejecting anything that would leave
/// the library root.
///
/// - `.` components and repeated separators are dropped.
/// - A leading `/` is ignored: `/Author/book.epub` means the same book as
///   `Author/book.epub`.
/// - `..` is resolved lexically; popping past the root is an error.
/// - Null bytes and Windows prefixes are rejected.
///
/// Symlinks are not resolved here (that needs the filesystem); see
/// [`LocalBackend`](crate::backend::LocalBackend).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use folio_storage::validate_path;
/// assert!(validate_path("Le Guin/The Dispossessed.epub").is_ok());
/// assert!(validate_path("shelf/../book.epub").is_ok()); // (never leaves library root)
/// assert!(validate_path("../outside.epub").is_err());
/// assert!(validate_path("a/../../b.epub").is_err());
/// assert!(validate_path("a\0b.epub").is_err());
/// assert_eq!(
///     validate_path("/shelf/./old/../book.epub").unwrap(),
///     Path::new("shelf/book.epub")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let reject = || exn::Exn::from(ErrorKind::InvalidPath(original.to_path_buf()));
    let mut components: Vec<&OsStr> = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(segment) => {
                // Null bytes survive Path::components() on Unix but truncate
                // the path once it reaches a syscall.
                if segment.as_encoded_bytes().contains(&0) {
                    return Err(reject());
                }
                components.push(segment);
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => return Err(reject()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    return Err(reject());
                }
            },
        }
    }
    if components.is_empty() {
        return Err(reject());
    }
    Ok(components.into_iter().collect())
}
