//! Library discovery: every `.epub` file under the root.

use async_stream::stream;
use folio_storage::backend::is_epub_path;
use folio_storage::{BackendHandle, FileInfo};
use futures::{Stream, StreamExt};

/// Streams the EPUB files of the library, recursively, in no particular
/// order.
///
/// Other files are left out silently. Entries the backend fails to list are
/// logged and left out too: one unreadable directory doesn't hide the rest of
/// the library.
pub fn discover(backend: &BackendHandle) -> impl Stream<Item = FileInfo> + '_ {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        for await entry in backend.list_stream(None) {
            match entry {
                Ok(info) if is_epub_path(&info.path) => yield info,
                Ok(info) => tracing::trace!(path = %info.path.display(), "Ignoring non-EPUB file"),
                Err(error) => tracing::warn!(backend = backend.name(), error = %*error, "Skipping unlistable library entry"),
            }
        }
    })
}

/// Collects [`discover()`] and sorts it by path.
pub async fn discover_sorted(backend: &BackendHandle) -> Vec<FileInfo> {
    let mut files: Vec<FileInfo> = discover(backend).collect().await;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_storage::backend::MockBackend;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_discover_only_epubs() {
        let backend: BackendHandle = Arc::new(MockBackend::with_files([
            ("b/second.epub", b"x".to_vec()),
            ("a/first.EPUB", b"x".to_vec()),
            ("notes.txt", b"x".to_vec()),
            ("cover.jpg", b"x".to_vec()),
        ]));
        let paths: Vec<PathBuf> = discover_sorted(&backend).await.into_iter().map(|info| info.path).collect();
        assert_eq!(paths, vec![PathBuf::from("a/first.EPUB"), PathBuf::from("b/second.epub")]);
    }
}
