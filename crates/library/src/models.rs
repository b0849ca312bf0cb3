//! Results of library queries.
//!
//! Paths are always library-relative and normalized (no leading `/`, no `.`
//! or `..` components), whatever form the caller used.

use std::path::PathBuf;

use folio_extract::models::{Chapter, Metadata};

/// One book as returned by [`Library::list_books()`](crate::Library::list_books).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BookListing {
    pub path: PathBuf,
    pub title: String,
    pub author: String,
    pub language: Option<String>,
    /// Why the book could not be read; its metadata is then the fallback
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChapterSummary {
    pub number: usize,
    pub title: Option<String>,
}

/// Metadata and table of contents of one book.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BookInfo {
    pub path: PathBuf,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub metadata: Metadata,
    pub chapter_count: usize,
    pub chapters: Vec<ChapterSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChapterText {
    pub number: usize,
    pub title: Option<String>,
    pub text: String,
}
impl From<&Chapter> for ChapterText {
    fn from(chapter: &Chapter) -> Self {
        Self { number: chapter.number, title: chapter.title.clone(), text: chapter.text.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SearchMatch {
    pub book_path: PathBuf,
    pub book_title: String,
    pub book_author: String,
    pub chapter_number: usize,
    pub chapter_title: Option<String>,
    /// Character (not byte) offset of the match in the chapter text
    pub offset: usize,
    /// The match and its surroundings, `...` marking a side cut short of the
    /// chapter bounds
    pub context: String,
}

/// A book left out of a library-wide search.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SkippedBook {
    pub path: PathBuf,
    pub error: String,
}

/// Partial results are still results: books that fail to load are listed in
/// `skipped` rather than failing the search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LibrarySearch {
    /// Ordered by book path, chapter, offset
    pub matches: Vec<SearchMatch>,
    pub skipped: Vec<SkippedBook>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Status {
    pub library_root: String,
    /// EPUB files currently in the library
    pub book_count: usize,
    /// Books with an index entry (metadata or full)
    pub indexed: usize,
    /// Books fully parsed into chapters
    pub loaded: usize,
}
