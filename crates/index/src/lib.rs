//! In-memory index of parsed books.
//!
//! The EPUB files are the source of truth; the index only saves re-parsing
//! them. Each entry remembers the fingerprint (modification time and size) of
//! the file it was built from, and every lookup re-stats the file: a changed
//! fingerprint is a miss.
//!
//! # Two speeds
//! - [`Index::summary()`] materializes metadata only (the package document),
//!   which is all listing needs.
//! - [`Index::get_or_load()`] materializes the whole book, chapters and text
//!   included.
//!
//! A summary request is happily answered from a full entry; a full entry is
//! never replaced by a summary.

pub mod error;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use folio_extract::ResolveOptions;
use folio_extract::models::{Book, Metadata};
use folio_storage::{BackendHandle, Fingerprint, validate_path};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// What the index holds for one path.
struct Entry {
    fingerprint: Fingerprint,
    metadata: Arc<Metadata>,
    /// `None` for a metadata-only entry
    book: Option<Arc<Book>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexStats {
    /// Paths with an entry of either kind
    pub entries: usize,
    /// Entries holding a fully materialized book
    pub books: usize,
}

/// Process-wide cache of parsed books, keyed by library-relative path.
///
/// Concurrent first requests for the same path are coalesced: one of them
/// ingests, the others wait for it and receive the very same [`Arc<Book>`].
/// Requests for different paths never wait on each other's ingestion.
pub struct Index {
    backend: BackendHandle,
    options: ResolveOptions,
    entries: RwLock<HashMap<PathBuf, Arc<Entry>>>,
    /// Ingestion locks, one per path currently being loaded.
    loading: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

enum Want {
    Summary,
    Book,
}

impl Index {
    pub fn new(backend: BackendHandle, options: ResolveOptions) -> Self {
        Self {
            backend,
            options,
            entries: RwLock::new(HashMap::new()),
            loading: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    /// Returns the fully materialized book at `path`, parsing it if there is
    /// no entry or the file changed since.
    ///
    /// # Errors
    ///
    /// Storage failures (missing file, forbidden path, I/O) and extraction
    /// failures. A failed load leaves no entry behind for `path`.
    #[instrument(skip(self, path, cancel), fields(path = %path.as_ref().display()))]
    pub async fn get_or_load(&self, path: impl AsRef<Path>, cancel: &CancellationToken) -> Result<Arc<Book>> {
        let (key, fingerprint) = self.locate(path.as_ref()).await?;
        if let Some(book) = self.cached(&key, fingerprint, &Want::Book).await.and_then(|entry| entry.book.clone()) {
            tracing::debug!("Index hit");
            return Ok(book);
        }
        let entry = self.load(key, fingerprint, Want::Book, cancel).await?;
        entry.book.clone().ok_or_else(|| exn::Exn::from(ErrorKind::Internal("full load produced no book".into())))
    }

    /// Returns the metadata of the book at `path`, reading only its package
    /// document if there is no valid entry.
    #[instrument(skip(self, path, cancel), fields(path = %path.as_ref().display()))]
    pub async fn summary(&self, path: impl AsRef<Path>, cancel: &CancellationToken) -> Result<Arc<Metadata>> {
        let (key, fingerprint) = self.locate(path.as_ref()).await?;
        if let Some(entry) = self.cached(&key, fingerprint, &Want::Summary).await {
            tracing::debug!("Index hit");
            return Ok(entry.metadata.clone());
        }
        Ok(self.load(key, fingerprint, Want::Summary, cancel).await?.metadata.clone())
    }

    /// Drops the entry for `path`, if any. Returns whether there was one.
    pub async fn invalidate(&self, path: impl AsRef<Path>) -> bool {
        match validate_path(path.as_ref()) {
            Ok(key) => self.entries.write().await.remove(&key).is_some(),
            Err(_) => false,
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of paths with an entry.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> IndexStats {
        let entries = self.entries.read().await;
        IndexStats {
            entries: entries.len(),
            books: entries.values().filter(|entry| entry.book.is_some()).count(),
        }
    }

    /// Normalizes the path and stats the file behind it.
    async fn locate(&self, path: &Path) -> Result<(PathBuf, Fingerprint)> {
        let key = validate_path(path).map_err(ErrorKind::storage)?;
        let info = self.backend.stat(&key).await.map_err(ErrorKind::storage)?;
        Ok((key, info.fingerprint()))
    }

    /// A current entry able to answer `want`, if there is one.
    async fn cached(&self, key: &Path, fingerprint: Fingerprint, want: &Want) -> Option<Arc<Entry>> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.fingerprint != fingerprint {
            tracing::debug!(path = %key.display(), "Index entry is stale");
            return None;
        }
        match want {
            Want::Book if entry.book.is_none() => None,
            _ => Some(entry.clone()),
        }
    }

    async fn path_lock(&self, key: &Path) -> Arc<Mutex<()>> {
        self.loading.lock().await.entry(key.to_path_buf()).or_default().clone()
    }

    async fn release_path_lock(&self, key: &Path, lock: Arc<Mutex<()>>) {
        let mut loading = self.loading.lock().await;
        // One reference in the map, one in `lock`: nobody else is waiting.
        if Arc::strong_count(&lock) <= 2 {
            loading.remove(key);
        }
    }

    async fn load(&self, key: PathBuf, fingerprint: Fingerprint, want: Want, cancel: &CancellationToken) -> Result<Arc<Entry>> {
        let lock = self.path_lock(&key).await;
        let result = {
            let _guard = lock.lock().await;
            // Whoever held the lock before us may have done the work already.
            match self.cached(&key, fingerprint, &want).await {
                Some(entry) => {
                    tracing::debug!("Index populated while waiting");
                    Ok(entry)
                },
                None => self.ingest(&key, fingerprint, want, cancel).await,
            }
        };
        self.release_path_lock(&key, lock).await;
        result
    }

    async fn ingest(&self, key: &Path, fingerprint: Fingerprint, want: Want, cancel: &CancellationToken) -> Result<Arc<Entry>> {
        tracing::debug!("Index miss");
        let started = Instant::now();
        let result = self.parse(key, want, cancel).await;
        let mut entries = self.entries.write().await;
        match result {
            Ok((metadata, book)) => {
                let entry = Arc::new(Entry { fingerprint, metadata: Arc::new(metadata), book: book.map(Arc::new) });
                match &entry.book {
                    Some(book) => tracing::info!(
                        chapters = book.chapter_count(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Book ingested"
                    ),
                    None => tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Metadata read"),
                }
                entries.insert(key.to_path_buf(), entry.clone());
                Ok(entry)
            },
            Err(err) => {
                let cancelled = matches!(&*err, ErrorKind::Extract(folio_extract::error::ErrorKind::Cancelled));
                if !cancelled && entries.remove(key).is_some() {
                    tracing::debug!("Dropped stale entry for a book that no longer loads");
                }
                Err(err)
            },
        }
    }

    /// Reads the file and parses it on a blocking thread.
    async fn parse(&self, key: &Path, want: Want, cancel: &CancellationToken) -> Result<(Metadata, Option<Book>)> {
        let bytes = self.backend.read(key).await.map_err(ErrorKind::storage)?;
        let path = key.to_path_buf();
        let options = self.options;
        let cancel = cancel.clone();
        let joined = tokio::task::spawn_blocking(move || match want {
            Want::Summary => folio_extract::read_metadata(bytes, &path).map(|metadata| (metadata, None)),
            Want::Book => folio_extract::read_book(bytes, &path, &options, &cancel)
                .map(|book| (book.metadata.clone(), Some(book))),
        })
        .await;
        match joined {
            Ok(parsed) => parsed.map_err(ErrorKind::extract),
            Err(join_error) => exn::bail!(ErrorKind::Internal(join_error.to_string())),
        }
    }
}
