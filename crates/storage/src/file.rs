//! File metadata returned by storage backends.

use std::path::PathBuf;
use time::OffsetDateTime;

/// Cheap identity of a file's current contents: last modification time and
/// size. Two stats of an untouched file produce equal fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub modified: OffsetDateTime,
    pub size: u64,
}

/// File metadata returned by storage backends.
///
/// This represents information about a file in storage, used for listing
/// operations and cache validity checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: OffsetDateTime) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            modified: self.modified,
            size: self.size,
        }
    }
}
