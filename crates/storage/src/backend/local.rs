//! Local filesystem storage backend.
//!
//! Files are read from a configured directory using `tokio::fs`. The backend
//! never creates, modifies or removes anything on disk.

use crate::backend::FileInfoStream;
use crate::error::ErrorKind;
use crate::{FileInfo, StorageBackend, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// All paths are relative to the configured root directory. Paths that
/// resolve outside the root, lexically or through a symlink, are refused
/// with [`InvalidPath`](ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```no_run
/// use folio_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/path/to/library")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory for the library, as configured
    root: PathBuf,
    /// Root directory with symlinks resolved, for containment checks. Unset
    /// until the root exists.
    canonical_root: Arc<OnceLock<PathBuf>>,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// A root that does not exist (yet) is accepted and behaves as an empty
    /// library; a mounted network share may well appear later.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists but is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() && !root.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if !root.exists() {
            tracing::warn!(root = %root.display(), "Library root does not exist");
        }
        let canonical_root = Arc::new(OnceLock::new());
        // Non-async: happens once on construction and isn't worth making the
        // constructor async for.
        if let Ok(canonical) = std::fs::canonicalize(&root) {
            let _ = canonical_root.set(canonical);
        }
        Ok(Self { name: name.into(), root, canonical_root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The root with symlinks resolved, canonicalizing it now if it did not
    /// exist at construction.
    async fn canonical_root(&self) -> Result<&Path> {
        if let Some(canonical) = self.canonical_root.get() {
            return Ok(canonical.as_path());
        }
        let canonical = fs::canonicalize(&self.root).await.map_err(|e| Self::map_io_error(e, &self.root))?;
        tracing::debug!(root = %self.root.display(), "Library root appeared");
        Ok(self.canonical_root.get_or_init(|| canonical).as_path())
    }

    /// Validates a relative path and resolves it to a real, absolute path
    /// inside the root.
    async fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let validated = validate_path(path)?;
        let joined = self.root.join(validated);
        let real = fs::canonicalize(&joined).await.map_err(|e| Self::map_io_error(e, path))?;
        if !real.starts_with(self.canonical_root().await?) {
            tracing::warn!(path = %path.display(), "Refusing path that resolves outside the library root");
            exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
        }
        Ok(real)
    }

    /// Convert an absolute path from the directory walk back to a relative
    /// storage path.
    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        validate_path(relative)
    }

    fn metadata(path: &Path, metadata: Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?.into();
        Ok(FileInfo::new(path, metadata.len(), modified))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Pulled out of the stream loop, where `?` isn't available.
    async fn process_entry(&self, entry: DirEntry, prefix: Option<&Path>) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        let relative = self.relative_path(&path)?;
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if let Some(pfx) = prefix
            && !relative.starts_with(pfx)
        {
            return Ok(WalkEntry::Skip);
        }
        if metadata.is_file() {
            return Ok(WalkEntry::File(Self::metadata(&relative, metadata)?));
        }
        // Symlinks aren't followed during discovery.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        let start_dir = validated_prefix
            .as_ref()
            // Walk from the parent of the prefix, so a prefix naming a file
            // (or a directory that doesn't exist yet) isn't an error.
            .map(|prefix| self.root.join(prefix).parent().unwrap_or(&self.root).to_path_buf())
            .unwrap_or_else(|| self.root.clone());
        let mut stack = vec![start_dir];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // A missing directory is an empty listing, not an error.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };
                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry, validated_prefix.as_deref()).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        match self.resolve(path).await {
            Ok(real) => Ok(fs::try_exists(&real).await.map_err(ErrorKind::Io)?),
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let real = self.resolve(path).await?;
        Ok(fs::read(&real).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let real = self.resolve(path).await?;
        let metadata = fs::metadata(&real).await.map_err(|e| Self::map_io_error(e, path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Self::metadata(&validate_path(path)?, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, LocalBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        (temp_dir, backend)
    }

    fn put(dir: &tempfile::TempDir, path: &str, data: &[u8]) {
        let target = dir.path().join(path);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(target, data).unwrap();
    }

    #[test]
    fn test_new_requires_absolute_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("name", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("name", "relative/path").is_err());
        let file = temp_dir.path().join("file.epub");
        std::fs::write(&file, b"data").unwrap();
        assert!(LocalBackend::new("name", &file).is_err());
    }

    #[tokio::test]
    async fn test_missing_root_is_empty_library() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path().join("not-mounted")).unwrap();
        assert!(backend.list(None).await.unwrap().is_empty());
        assert!(!backend.exists(Path::new("book.epub")).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_root_appearing_later_under_symlinked_parent() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp_dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("real"), temp_dir.path().join("mnt")).unwrap();
        let root = temp_dir.path().join("mnt/library");
        let backend = LocalBackend::new("name", &root).unwrap();

        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("book.epub"), b"data").unwrap();
        assert_eq!(backend.list(None).await.unwrap().len(), 1);
        assert_eq!(backend.stat(Path::new("book.epub")).await.unwrap().size, 4);
        assert_eq!(backend.read(Path::new("book.epub")).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_read_and_stat() {
        let (dir, backend) = setup();
        put(&dir, "Author/book.epub", b"Hello, world!");
        let data = backend.read(Path::new("Author/book.epub")).await.unwrap();
        assert_eq!(data, b"Hello, world!");
        let info = backend.stat(Path::new("/Author/./book.epub")).await.unwrap();
        assert_eq!(info.path, PathBuf::from("Author/book.epub"));
        assert_eq!(info.size, 13);
    }

    #[tokio::test]
    async fn test_stat_directory_is_not_found() {
        let (dir, backend) = setup();
        put(&dir, "Author/book.epub", b"data");
        let err = backend.stat(Path::new("Author")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_exists() {
        let (dir, backend) = setup();
        assert!(!backend.exists(Path::new("nonexistent.epub")).await.unwrap());
        put(&dir, "exists.epub", b"data");
        assert!(backend.exists(Path::new("exists.epub")).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let (_dir, backend) = setup();
        let err = backend.read(Path::new("missing.epub")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_recurses() {
        let (dir, backend) = setup();
        put(&dir, "a.epub", b"1");
        put(&dir, "shelf/b.epub", b"2");
        put(&dir, "shelf/deeper/c.epub", b"3");
        let mut paths: Vec<_> = backend.list(None).await.unwrap().into_iter().map(|f| f.path).collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![PathBuf::from("a.epub"), PathBuf::from("shelf/b.epub"), PathBuf::from("shelf/deeper/c.epub")]
        );
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let (dir, backend) = setup();
        put(&dir, "Shelf/Sub/file.epub", b"data");
        put(&dir, "Shelf/Subdir/file.epub", b"data");
        put(&dir, "Shelf/Subfile.epub", b"data");
        let mut files = backend.list(Some(Path::new("Shelf/Sub"))).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files.pop().unwrap().path, Path::new("Shelf/Sub/file.epub"));
    }

    #[tokio::test]
    async fn test_path_security() {
        let (_dir, backend) = setup();
        let err = backend.read(Path::new("../etc/passwd")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
        assert!(backend.read(Path::new("etc/../../passwd")).await.is_err());
        assert!(backend.stat(Path::new("../../file.epub")).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_refused() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.epub"), b"secret").unwrap();
        let (dir, backend) = setup();
        std::os::unix::fs::symlink(outside.path().join("secret.epub"), dir.path().join("link.epub")).unwrap();
        let err = backend.read(Path::new("link.epub")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
        // Discovery doesn't follow symlinks at all.
        assert!(backend.list(None).await.unwrap().is_empty());
    }
}
