//! In-memory storage backend for testing.

use super::FileInfoStream;
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Every
/// [`insert()`](Self::insert) stamps the file with a strictly later
/// modification time than the one before it, so replacing a file always
/// changes its fingerprint, even when the size stays the same.
///
/// # Examples
///
/// ```
/// use folio_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("Le Guin/The Dispossessed.epub", b"PK..."),
/// ]);
/// assert!(backend.exists(Path::new("Le Guin/The Dispossessed.epub")).await?);
///
/// backend.insert("Le Guin/Lathe of Heaven.epub", b"PK...").await;
/// assert_eq!(backend.list(None).await?.len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<PathBuf, (OffsetDateTime, Vec<u8>)>>,
    clock: AtomicI64,
    reads: AtomicUsize,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let backend = Self {
            name: "mock".to_string(),
            storage: RwLock::new(HashMap::new()),
            clock: AtomicI64::new(0),
            reads: AtomicUsize::new(0),
        };
        let mut map = HashMap::new();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (backend.tick(), data.into()));
        }
        Self {
            storage: RwLock::new(map),
            ..backend
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add or replace a file, giving it a fresh modification time.
    ///
    /// Panics on an invalid path, like [`with_files()`](Self::with_files).
    pub async fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        let path = path.into();
        let Ok(validated) = validate_path(&path) else {
            panic!("MockBackend::insert: invalid path {}", path.display());
        };
        let modified = self.tick();
        self.storage.write().await.insert(validated, (modified, data.into()));
    }

    /// Remove a file; returns whether it was present.
    pub async fn remove(&self, path: impl AsRef<Path>) -> bool {
        match validate_path(path) {
            Ok(validated) => self.storage.write().await.remove(&validated).is_some(),
            Err(_) => false,
        }
    }

    /// Number of successful [`read()`](StorageBackend::read) calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn tick(&self) -> OffsetDateTime {
        let seconds = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(seconds)
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot under the read lock; don't hold it across yield points.
            let entries: Vec<FileInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| match &validated_prefix {
                        Some(pfx) => path.starts_with(pfx),
                        None => true,
                    })
                    .map(|(path, (modified, data))| FileInfo::new(path.clone(), data.len() as u64, *modified))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let (_modified, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(data)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let (modified, data) = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(FileInfo::new(path.clone(), data.len() as u64, *modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_read() {
        let backend = MockBackend::default();
        backend.insert("test.epub", b"hello".to_vec()).await;
        let data = backend.read(Path::new("test.epub")).await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(backend.read_count(), 1);
    }

    #[tokio::test]
    async fn test_with_files() {
        let backend = MockBackend::with_files([
            ("a/one.epub", Vec::from(*b"one")),
            ("b/two.epub", Vec::from(*b"two")),
        ]);
        assert!(backend.exists(Path::new("a/one.epub")).await.unwrap());
        assert!(backend.exists(Path::new("b/two.epub")).await.unwrap());
        assert!(!backend.exists(Path::new("c/nope.epub")).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("missing.epub")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert_eq!(backend.read_count(), 0);
    }

    #[tokio::test]
    async fn test_replace_changes_fingerprint() {
        let backend = MockBackend::default();
        backend.insert("book.epub", b"12345".to_vec()).await;
        let before = backend.stat(Path::new("book.epub")).await.unwrap().fingerprint();
        backend.insert("book.epub", b"54321".to_vec()).await;
        let after = backend.stat(Path::new("book.epub")).await.unwrap().fingerprint();
        assert_eq!(before.size, after.size);
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_remove() {
        let backend = MockBackend::with_files([("book.epub", Vec::from(*b"x"))]);
        assert!(backend.remove("book.epub").await);
        assert!(!backend.remove("book.epub").await);
        let err = backend.stat(Path::new("book.epub")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MockBackend::with_files([
            ("Shelf1/one.epub", Vec::from(*b"a")),
            ("Shelf1/two.epub", Vec::from(*b"b")),
            ("Shelf2/three.epub", Vec::from(*b"c")),
        ]);
        let files = backend.list(Some(Path::new("Shelf1"))).await.unwrap();
        assert_eq!(files.len(), 2);
        let paths: Vec<_> = files.iter().map(|f| &f.path).collect();
        assert!(paths.contains(&&PathBuf::from("Shelf1/one.epub")));
        assert!(paths.contains(&&PathBuf::from("Shelf1/two.epub")));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("../etc/passwd")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape.epub", Vec::from(*b"bad"))]);
    }
}
