use super::{Chapter, Metadata};

/// A recoverable problem found while reading one content document.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Diagnostic {
    /// Archive entry name of the document
    pub document: String,
    pub message: String,
}

/// A fully materialized book: metadata plus its resolved chapters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Book {
    pub metadata: Metadata,
    pub chapters: Vec<Chapter>,
    pub diagnostics: Vec<Diagnostic>,
}
impl Book {
    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    /// Chapter by its 1-based number.
    pub fn chapter(&self, number: usize) -> Option<&Chapter> {
        number.checked_sub(1).and_then(|index| self.chapters.get(index))
    }

    /// Chapters `start..=end` by 1-based number, or `None` unless
    /// `1 <= start <= end <= chapter_count`.
    pub fn chapters_range(&self, start: usize, end: usize) -> Option<&[Chapter]> {
        if start == 0 || start > end || end > self.chapters.len() {
            return None;
        }
        Some(&self.chapters[start - 1..end])
    }
}
