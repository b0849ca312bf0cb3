//! EPUB-filtered storage backend decorator.
//!
//! Wraps another backend and restricts all operations to `.epub` files.
//! Listing silently drops everything else; direct access to anything else is
//! refused with [`UnsupportedFormat`](ErrorKind::UnsupportedFormat).

use crate::backend::FileInfoStream;
use crate::error::ErrorKind;
use crate::{BackendHandle, StorageBackend, error::Result, file::FileInfo};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;

/// The only container extension folio knows how to open.
pub const EPUB_EXTENSION: &str = "epub";

/// Check if a path has the `.epub` extension (case-insensitive).
///
/// ```
/// use folio_storage::backend::is_epub_path;
/// assert!(is_epub_path("Author/Book.EPUB"));
/// assert!(!is_epub_path("Author/Book.pdf"));
/// assert!(!is_epub_path("epub"));
/// ```
pub fn is_epub_path(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(EPUB_EXTENSION))
}

fn ensure_epub(path: &Path) -> Result<()> {
    if !is_epub_path(path) {
        exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf()));
    }
    Ok(())
}

/// EPUB-filtered storage backend.
#[derive(Clone)]
pub struct EpubOnlyBackend {
    inner: BackendHandle,
}
impl EpubOnlyBackend {
    pub fn new(inner: BackendHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StorageBackend for EpubOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        Box::pin(self.inner.list_stream(prefix).filter(|item| {
            std::future::ready(match item {
                Ok(info) => is_epub_path(&info.path),
                Err(_) => true, // propagate errors
            })
        }))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        ensure_epub(path)?;
        self.inner.exists(path).await
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        ensure_epub(path)?;
        self.inner.read(path).await
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        ensure_epub(path)?;
        self.inner.stat(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn test_is_epub_path() {
        assert!(is_epub_path(Path::new("book.epub")));
        assert!(is_epub_path(Path::new("a/b/c/book.Epub")));
        assert!(!is_epub_path(Path::new("book.epub.bak")));
        assert!(!is_epub_path(Path::new("notes.txt")));
        assert!(!is_epub_path(Path::new(".epub")));
        assert!(!is_epub_path(Path::new("Makefile")));
    }

    fn setup() -> (tempfile::TempDir, EpubOnlyBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let local = LocalBackend::new("test", temp_dir.path()).unwrap();
        let backend: BackendHandle = Arc::new(local);
        (temp_dir, EpubOnlyBackend::new(backend))
    }

    #[tokio::test]
    async fn test_list_filters_by_extension() {
        let (dir, backend) = setup();
        std::fs::create_dir_all(dir.path().join("shelf")).unwrap();
        std::fs::write(dir.path().join("one.epub"), b"data").unwrap();
        std::fs::write(dir.path().join("shelf/two.EPUB"), b"data").unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"data").unwrap();
        std::fs::write(dir.path().join("shelf/notes.txt"), b"data").unwrap();

        let files = backend.list(None).await.unwrap();
        assert_eq!(files.len(), 2);
        let paths: Vec<_> = files.iter().map(|f| &f.path).collect();
        assert!(paths.contains(&&PathBuf::from("one.epub")));
        assert!(paths.contains(&&PathBuf::from("shelf/two.EPUB")));
    }

    #[tokio::test]
    async fn test_direct_access_rejects_other_formats() {
        let (dir, backend) = setup();
        std::fs::write(dir.path().join("notes.txt"), b"data").unwrap();
        let err = backend.read(Path::new("notes.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
        let err = backend.stat(Path::new("notes.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
        let err = backend.exists(Path::new("notes.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_missing_epub_is_not_found() {
        let (_dir, backend) = setup();
        let err = backend.stat(Path::new("missing.epub")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }
}
