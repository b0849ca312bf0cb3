//! Query operations over a library of EPUB files.
//!
//! A [`Library`] answers the six queries clients ask of it (listing, book
//! info, single chapters, chapter ranges, search within a book and across the
//! whole library) from a shared [`Index`], which parses each book at most once
//! per change on disk.

pub mod error;
pub mod models;
mod scan;
pub mod search;

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use folio_extract::fallback_title;
use folio_extract::models::Book;
use folio_index::Index;
use folio_storage::backend::EpubOnlyBackend;
use folio_storage::{BackendHandle, validate_path};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

pub use crate::error::{Error, ErrorKind, Result};
use crate::models::{
    BookInfo, BookListing, ChapterSummary, ChapterText, LibrarySearch, SearchMatch, SkippedBook, Status,
};
pub use crate::scan::{discover, discover_sorted};
use crate::search::{Query, SearchOptions};
pub use folio_extract::ResolveOptions;

/// Books processed at once by library-wide operations. Each one in flight may
/// hold a whole archive in memory.
pub const MAX_PROCESS_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryOptions {
    pub resolve: ResolveOptions,
    pub search: SearchOptions,
}

pub struct Library {
    index: Arc<Index>,
    search: SearchOptions,
    cancel: CancellationToken,
}

impl Library {
    /// A library over `backend`, with a fresh index. Only `.epub` files are
    /// ever read from `backend`.
    pub fn new(backend: BackendHandle, options: LibraryOptions) -> Self {
        let backend: BackendHandle = Arc::new(EpubOnlyBackend::new(backend));
        Self::with_index(Arc::new(Index::new(backend, options.resolve)), options.search)
    }

    /// A library sharing an existing index. The index's backend should be
    /// wrapped in an [`EpubOnlyBackend`].
    pub fn with_index(index: Arc<Index>, search: SearchOptions) -> Self {
        Self { index, search, cancel: CancellationToken::new() }
    }

    /// Ingestion started by this library stops at the next content document
    /// once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Every EPUB file under the library root, sorted by path, with its
    /// metadata.
    ///
    /// Books that cannot be read are still listed: with fallback metadata and
    /// the reason in [`error`](BookListing::error).
    #[instrument(skip(self))]
    pub async fn list_books(&self) -> Result<Vec<BookListing>> {
        self.ensure_not_cancelled()?;
        let files = discover_sorted(self.index.backend()).await;
        let mut listings = process_bounded(files.into_iter().map(|file| self.listing(file.path))).await;
        self.ensure_not_cancelled()?;
        listings.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!(count = listings.len(), "Library listed");
        Ok(listings)
    }

    /// # Errors
    ///
    /// [`BookNotFound`](ErrorKind::BookNotFound),
    /// [`PathForbidden`](ErrorKind::PathForbidden),
    /// [`UnsupportedFormat`](ErrorKind::UnsupportedFormat), or any ingestion
    /// error.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn get_book_info(&self, path: impl AsRef<Path>) -> Result<BookInfo> {
        let (path, book) = self.book(path.as_ref()).await?;
        Ok(BookInfo {
            path,
            metadata: book.metadata.clone(),
            chapter_count: book.chapter_count(),
            chapters: book
                .chapters
                .iter()
                .map(|chapter| ChapterSummary { number: chapter.number, title: chapter.title.clone() })
                .collect(),
        })
    }

    /// Chapter `number` (1-based) of the book at `path`.
    ///
    /// # Errors
    ///
    /// [`ChapterOutOfRange`](ErrorKind::ChapterOutOfRange) unless
    /// `1 <= number <= chapter_count`; otherwise as [`get_book_info()`](Self::get_book_info).
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn get_chapter(&self, path: impl AsRef<Path>, number: usize) -> Result<ChapterText> {
        let (_, book) = self.book(path.as_ref()).await?;
        match book.chapter(number) {
            Some(chapter) => Ok(chapter.into()),
            None => exn::bail!(ErrorKind::ChapterOutOfRange { number, count: book.chapter_count() }),
        }
    }

    /// Chapters `start..=end` (1-based, inclusive) of the book at `path`.
    ///
    /// # Errors
    ///
    /// [`InvalidRange`](ErrorKind::InvalidRange) if `start > end` or either
    /// end lies outside `1..=chapter_count`; otherwise as
    /// [`get_book_info()`](Self::get_book_info).
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn get_chapters_range(&self, path: impl AsRef<Path>, start: usize, end: usize) -> Result<Vec<ChapterText>> {
        let (_, book) = self.book(path.as_ref()).await?;
        match book.chapters_range(start, end) {
            Some(chapters) => Ok(chapters.iter().map(ChapterText::from).collect()),
            None => exn::bail!(ErrorKind::InvalidRange { start, end, count: book.chapter_count() }),
        }
    }

    /// Every occurrence of `query` in the book at `path`, ordered by chapter,
    /// then offset.
    ///
    /// # Errors
    ///
    /// [`InvalidQuery`](ErrorKind::InvalidQuery) for an empty query; otherwise
    /// as [`get_book_info()`](Self::get_book_info). No match is not an error.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn search_book(&self, path: impl AsRef<Path>, query: &str) -> Result<Vec<SearchMatch>> {
        let query = Query::new(query)?;
        let (path, book) = self.book(path.as_ref()).await?;
        let matches = search::search_book(&path, &book, &query, self.search.context_chars, None);
        tracing::debug!(matches = matches.len(), "Book searched");
        Ok(matches)
    }

    /// Every occurrence of `query` across the library, ordered by book path,
    /// chapter, then offset, and capped at
    /// [`max_results_per_book`](SearchOptions::max_results_per_book) per book.
    ///
    /// Books that fail to load are reported in
    /// [`skipped`](LibrarySearch::skipped) instead of failing the search.
    ///
    /// # Errors
    ///
    /// [`InvalidQuery`](ErrorKind::InvalidQuery) for an empty query, and
    /// [`Cancelled`](ErrorKind::Cancelled).
    #[instrument(skip(self))]
    pub async fn search_library(&self, query: &str) -> Result<LibrarySearch> {
        let query = Query::new(query)?;
        self.ensure_not_cancelled()?;
        let files = discover_sorted(self.index.backend()).await;
        let searches = files.into_iter().map(|file| {
            let query = &query;
            async move {
                let result = self.search_for_library(&file.path, query).await;
                (file.path, result)
            }
        });
        let mut results = process_bounded(searches).await;
        self.ensure_not_cancelled()?;
        results.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut search = LibrarySearch::default();
        for (path, result) in results {
            match result {
                Ok(matches) => search.matches.extend(matches),
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %*error, "Skipping unreadable book");
                    search.skipped.push(SkippedBook { path, error: (*error).to_string() });
                },
            }
        }
        tracing::debug!(matches = search.matches.len(), skipped = search.skipped.len(), "Library searched");
        Ok(search)
    }

    /// A summary of the library and its index.
    pub async fn status(&self) -> Result<Status> {
        let book_count = discover(self.index.backend()).count().await;
        let stats = self.index.stats().await;
        Ok(Status {
            library_root: self.index.backend().name().to_string(),
            book_count,
            indexed: stats.entries,
            loaded: stats.books,
        })
    }

    /// Forgets what the index knows about the book at `path`. Returns whether
    /// there was anything to forget.
    pub async fn invalidate(&self, path: impl AsRef<Path>) -> bool {
        self.index.invalidate(path).await
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        Ok(())
    }

    /// Normalizes `path` and loads the book behind it.
    async fn book(&self, path: &Path) -> Result<(PathBuf, Arc<Book>)> {
        let normalized = normalize(path)?;
        let book = self.index.get_or_load(&normalized, &self.cancel).await.map_err(ErrorKind::index)?;
        Ok((normalized, book))
    }

    async fn search_for_library(&self, path: &Path, query: &Query) -> Result<Vec<SearchMatch>> {
        let (path, book) = self.book(path).await?;
        let options = &self.search;
        Ok(search::search_book(&path, &book, query, options.context_chars, options.max_results_per_book))
    }

    async fn listing(&self, path: PathBuf) -> BookListing {
        match self.index.summary(&path, &self.cancel).await {
            Ok(metadata) => BookListing {
                path,
                title: metadata.title.clone(),
                author: metadata.author.clone(),
                language: metadata.language.clone(),
                error: None,
            },
            Err(error) => {
                let error = ErrorKind::index(error);
                tracing::warn!(path = %path.display(), error = %*error, "Listing book with fallback metadata");
                let fallback = folio_extract::models::Metadata::fallback(fallback_title(&path));
                BookListing {
                    path,
                    title: fallback.title,
                    author: fallback.author,
                    language: None,
                    error: Some((*error).to_string()),
                }
            },
        }
    }
}

fn normalize(path: &Path) -> Result<PathBuf> {
    validate_path(path).map_err(|err| {
        let kind = ErrorKind::PathForbidden(path.to_path_buf());
        err.raise(kind)
    })
}

/// Runs `futures` with at most [`MAX_PROCESS_CONCURRENCY`] in flight,
/// returning their outputs in completion order.
async fn process_bounded<F: Future>(futures: impl IntoIterator<Item = F>) -> Vec<F::Output> {
    let mut queue: VecDeque<F> = futures.into_iter().collect();
    let mut results = Vec::with_capacity(queue.len());
    let mut processing = FuturesUnordered::new();
    processing.extend(queue.drain(..MAX_PROCESS_CONCURRENCY.min(queue.len())));
    while let Some(result) = processing.next().await {
        results.push(result);
        // Pop-n-push, FIFO.
        if let Some(next) = queue.pop_front() {
            processing.push(next);
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_extract::testing::EpubBuilder;
    use folio_storage::backend::{LocalBackend, MockBackend};
    use rstest::rstest;

    fn book(title: &str, chapters: &[&str]) -> Vec<u8> {
        chapters
            .iter()
            .enumerate()
            .fold(EpubBuilder::new().title(title).creator("A. Author").language("en"), |builder, (i, text)| {
                builder.chapter(format!("Chapter {}", i + 1), format!("<p>{text}</p>"))
            })
            .build()
    }

    fn hello_world() -> Vec<u8> {
        book("Hello", &["Hello world.", "Goodbye world."])
    }

    fn library(files: Vec<(&str, Vec<u8>)>) -> (Arc<MockBackend>, Library) {
        let mock = Arc::new(MockBackend::with_files(files));
        let backend: BackendHandle = mock.clone();
        (mock, Library::new(backend, LibraryOptions::default()))
    }

    #[tokio::test]
    async fn test_two_chapter_book() {
        let (_, library) = library(vec![("hello.epub", hello_world())]);

        let listing = library.list_books().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].title, "Hello");
        assert_eq!(listing[0].author, "A. Author");
        assert_eq!(listing[0].language.as_deref(), Some("en"));

        let info = library.get_book_info("hello.epub").await.unwrap();
        assert_eq!(info.chapter_count, 2);
        assert_eq!(info.chapters.len(), info.chapter_count);
        assert_eq!(info.chapters.iter().map(|c| c.number).collect::<Vec<_>>(), vec![1, 2]);

        let search = library.search_library("world").await.unwrap();
        assert!(search.skipped.is_empty());
        let positions: Vec<_> = search.matches.iter().map(|m| (m.chapter_number, m.offset)).collect();
        assert_eq!(positions, vec![(1, 6), (2, 8)]);
        assert_eq!(search.matches[0].book_path, Path::new("hello.epub"));
    }

    #[tokio::test]
    async fn test_chapter_and_range_agree() {
        let (_, library) = library(vec![("b.epub", book("B", &["one", "two", "three"]))]);
        for number in 1..=3 {
            let chapter = library.get_chapter("b.epub", number).await.unwrap();
            let range = library.get_chapters_range("b.epub", number, number).await.unwrap();
            assert_eq!(range, vec![chapter]);
        }
        let all = library.get_chapters_range("b.epub", 1, 3).await.unwrap();
        let texts: Vec<_> = all.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert_eq!(all[2].title.as_deref(), Some("Chapter 3"));
    }

    #[rstest]
    #[case(0)]
    #[case(4)]
    #[tokio::test]
    async fn test_chapter_out_of_range(#[case] number: usize) {
        let (_, library) = library(vec![("b.epub", book("B", &["one", "two", "three"]))]);
        let err = library.get_chapter("b.epub", number).await.unwrap_err();
        assert_eq!(*err, ErrorKind::ChapterOutOfRange { number, count: 3 });
    }

    #[rstest]
    #[case(2, 1)]
    #[case(0, 2)]
    #[case(2, 4)]
    #[tokio::test]
    async fn test_invalid_range(#[case] start: usize, #[case] end: usize) {
        let (_, library) = library(vec![("b.epub", book("B", &["one", "two", "three"]))]);
        let err = library.get_chapters_range("b.epub", start, end).await.unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidRange { start, end, count: 3 });
    }

    #[tokio::test]
    async fn test_search_book() {
        let (_, library) = library(vec![("m.epub", book("M", &["Magic and MAGIC.", "The end.", "Chapter magic"]))]);
        let matches = library.search_book("/m.epub", "magic").await.unwrap();
        let positions: Vec<_> = matches.iter().map(|m| (m.chapter_number, m.offset)).collect();
        assert_eq!(positions, vec![(1, 0), (1, 10), (3, 8)]);
        assert_eq!(matches[0].book_path, Path::new("m.epub"));

        assert!(library.search_book("m.epub", "absent").await.unwrap().is_empty());
        assert!(library.search_book("m.epub", "end. Chapter").await.unwrap().is_empty());
        let err = library.search_book("m.epub", "").await.unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidQuery);
    }

    #[rstest]
    #[case::missing("missing.epub", ErrorKind::BookNotFound("missing.epub".into()))]
    #[case::traversal("../x.epub", ErrorKind::PathForbidden("../x.epub".into()))]
    #[case::not_epub("notes.txt", ErrorKind::UnsupportedFormat("notes.txt".into()))]
    #[case::garbage("garbage.epub", ErrorKind::NotAnArchive(String::new()))]
    #[case::no_manifest("no-manifest.epub", ErrorKind::ManifestMissing)]
    #[case::missing_document("hole.epub", ErrorKind::ContentDocumentMissing("OEBPS/chapter1.xhtml".into()))]
    #[tokio::test]
    async fn test_book_errors(#[case] path: &str, #[case] expected: ErrorKind) {
        let (_, library) = library(vec![
            ("notes.txt", b"just some notes".to_vec()),
            ("garbage.epub", b"definitely not a zip".to_vec()),
            ("no-manifest.epub", EpubBuilder::new().chapter("One", "<p>x</p>").without_container().without_package().build()),
            ("hole.epub", EpubBuilder::new().chapter("One", "<p>x</p>").omit("chapter1.xhtml").build()),
        ]);
        let err = library.get_book_info(path).await.unwrap_err();
        match (&*err, &expected) {
            (ErrorKind::NotAnArchive(_), ErrorKind::NotAnArchive(_)) => {},
            (actual, expected) => assert_eq!(actual, expected),
        }
    }

    #[tokio::test]
    async fn test_list_books_reports_failures_inline() {
        let (_, library) = library(vec![
            ("b/good.epub", hello_world()),
            ("a/bad.epub", b"not a zip".to_vec()),
            ("cover.jpg", b"jpeg".to_vec()),
        ]);
        let listing = library.list_books().await.unwrap();
        let paths: Vec<_> = listing.iter().map(|book| book.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("a/bad.epub"), PathBuf::from("b/good.epub")]);
        assert_eq!(listing[0].title, "bad");
        assert_eq!(listing[0].author, "Unknown");
        assert!(listing[0].error.is_some());
        assert!(listing[1].error.is_none());
    }

    #[tokio::test]
    async fn test_search_library_skips_broken_books() {
        let (_, library) = library(vec![
            ("z.epub", book("Z", &["a world apart"])),
            ("broken.epub", b"not a zip".to_vec()),
            ("a.epub", hello_world()),
        ]);
        let search = library.search_library("WORLD").await.unwrap();
        let positions: Vec<_> =
            search.matches.iter().map(|m| (m.book_path.to_string_lossy().into_owned(), m.chapter_number)).collect();
        assert_eq!(
            positions,
            vec![("a.epub".to_string(), 1), ("a.epub".to_string(), 2), ("z.epub".to_string(), 1)]
        );
        assert_eq!(search.skipped.len(), 1);
        assert_eq!(search.skipped[0].path, Path::new("broken.epub"));
        assert!(library.search_library("").await.is_err());
    }

    #[tokio::test]
    async fn test_search_library_caps_results_per_book() {
        let mock = Arc::new(MockBackend::with_files([("a.epub", book("A", &["x x x", "x x"]))]));
        let options = LibraryOptions {
            search: SearchOptions { context_chars: 0, max_results_per_book: Some(2) },
            ..LibraryOptions::default()
        };
        let library = Library::new(mock, options);
        assert_eq!(library.search_library("x").await.unwrap().matches.len(), 2);
        // Single-book search is never capped.
        assert_eq!(library.search_book("a.epub", "x").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_modified_book_is_reloaded() {
        let (mock, library) = library(vec![("a.epub", book("A", &["first edition"]))]);
        let before = library.get_chapter("a.epub", 1).await.unwrap();
        assert_eq!(library.get_chapter("a.epub", 1).await.unwrap(), before);
        assert_eq!(mock.read_count(), 1);

        mock.insert("a.epub", book("A", &["second edition"])).await;
        assert_eq!(library.get_chapter("a.epub", 1).await.unwrap().text, "second edition");
    }

    #[tokio::test]
    async fn test_cancelled_library() {
        let (_, library) = library(vec![("a.epub", hello_world())]);
        let cancel = CancellationToken::new();
        let library = library.with_cancellation(cancel.clone());
        cancel.cancel();
        assert_eq!(*library.get_book_info("a.epub").await.unwrap_err(), ErrorKind::Cancelled);
        assert_eq!(*library.list_books().await.unwrap_err(), ErrorKind::Cancelled);
        assert_eq!(*library.search_library("world").await.unwrap_err(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_status_and_invalidate() {
        let (_, library) = library(vec![("a.epub", hello_world()), ("b.epub", hello_world()), ("c.txt", vec![])]);
        library.list_books().await.unwrap();
        library.get_book_info("a.epub").await.unwrap();
        let status = library.status().await.unwrap();
        assert_eq!(status.library_root, "mock");
        assert_eq!((status.book_count, status.indexed, status.loaded), (2, 2, 1));

        assert!(library.invalidate("a.epub").await);
        assert_eq!(library.status().await.unwrap().indexed, 1);
    }

    #[tokio::test]
    async fn test_local_library() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Le Guin")).unwrap();
        std::fs::write(dir.path().join("Le Guin/The Dispossessed.epub"), hello_world()).unwrap();
        std::fs::write(dir.path().join("readme.txt"), "not a book").unwrap();
        let backend: BackendHandle = Arc::new(LocalBackend::new("local", dir.path()).unwrap());
        let library = Library::new(backend, LibraryOptions::default());

        let listing = library.list_books().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path, Path::new("Le Guin/The Dispossessed.epub"));
        let chapter = library.get_chapter("/Le Guin/The Dispossessed.epub", 2).await.unwrap();
        assert_eq!(chapter.text, "Goodbye world.");
        let err = library.get_book_info("Le Guin/../../etc/passwd.epub").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PathForbidden(_)));
    }
}
