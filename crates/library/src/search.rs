//! Case-insensitive substring search over normalized chapter text.
//!
//! Both sides are folded one character at a time with Unicode lowercase
//! mapping, then searched byte-wise with [`memmem`]. Every folded character
//! remembers which character of the original text it came from, so offsets
//! and context are always reported against the original text.
//!
//! Chapters are searched independently: a match never spans two chapters.

use std::iter;
use std::path::Path;

use folio_extract::models::{Book, Chapter};
use memchr::memmem;

use crate::error::{ErrorKind, Result};
use crate::models::SearchMatch;

/// Characters of context on either side of a match, unless configured.
pub const DEFAULT_CONTEXT_CHARS: usize = 200;
/// Marks a side of the context that was cut short of the chapter bounds.
pub const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchOptions {
    /// Characters of context before and after each match
    pub context_chars: usize,
    /// Cap on matches per book in library-wide searches; `None` is unlimited
    pub max_results_per_book: Option<usize>,
}
impl Default for SearchOptions {
    fn default() -> Self {
        Self { context_chars: DEFAULT_CONTEXT_CHARS, max_results_per_book: None }
    }
}

/// A validated, folded search query.
#[derive(Debug, Clone)]
pub struct Query {
    folded: String,
}
impl Query {
    /// # Errors
    ///
    /// [`InvalidQuery`](ErrorKind::InvalidQuery) if `query` is empty.
    pub fn new(query: &str) -> Result<Self> {
        if query.is_empty() {
            exn::bail!(ErrorKind::InvalidQuery);
        }
        Ok(Self { folded: query.chars().flat_map(char::to_lowercase).collect() })
    }
}

/// A match inside one chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Hit {
    /// Character offset of the match in the chapter text
    pub offset: usize,
    pub context: String,
}

/// Lowercased text, with the origin of every folded character.
struct Folded {
    text: String,
    /// `(byte offset in folded text, char index in original text)`, one per
    /// folded character
    origins: Vec<(usize, usize)>,
}
impl Folded {
    fn new(original: &str) -> Self {
        let mut text = String::with_capacity(original.len());
        let mut origins = Vec::with_capacity(original.len());
        for (index, c) in original.chars().enumerate() {
            for lower in c.to_lowercase() {
                origins.push((text.len(), index));
                text.push(lower);
            }
        }
        Self { text, origins }
    }

    /// Original character span `[start, end)` covered by folded bytes
    /// `[start, end)`, or `None` when either end falls inside the expansion of
    /// a single original character.
    fn original_span(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        let first = self.origins.binary_search_by_key(&start, |&(byte, _)| byte).ok()?;
        let last = self.origins.partition_point(|&(byte, _)| byte < end).checked_sub(1)?;
        let origin = |i: usize| self.origins.get(i).map(|&(_, index)| index);
        if first > 0 && origin(first - 1) == origin(first) {
            return None;
        }
        if origin(last + 1) == origin(last) {
            return None;
        }
        Some((origin(first)?, origin(last)? + 1))
    }
}

/// Finds every occurrence of `query` in `text`, overlapping ones included, in
/// order of offset. Stops after `limit` hits.
pub(crate) fn find(text: &str, query: &Query, context_chars: usize, limit: Option<usize>) -> Vec<Hit> {
    let limit = limit.unwrap_or(usize::MAX);
    if limit == 0 || text.is_empty() {
        return Vec::new();
    }
    let folded = Folded::new(text);
    let haystack = folded.text.as_bytes();
    let needle = query.folded.as_bytes();
    let finder = memmem::Finder::new(needle);
    // Byte offset of every character, plus the end of the text.
    let boundaries: Vec<usize> = text.char_indices().map(|(byte, _)| byte).chain(iter::once(text.len())).collect();
    let char_count = boundaries.len() - 1;

    let mut hits = Vec::new();
    let mut from = 0;
    while hits.len() < limit
        && let Some(found) = finder.find(&haystack[from..])
    {
        let start = from + found;
        // Step one character, not one match, so overlapping matches are found.
        from = start + folded.text[start..].chars().next().map_or(1, char::len_utf8);
        let Some((first, end)) = folded.original_span(start, start + needle.len()) else {
            continue;
        };
        let context_start = first.saturating_sub(context_chars);
        let context_end = end.saturating_add(context_chars).min(char_count);
        let mut context = String::new();
        if context_start > 0 {
            context.push_str(ELLIPSIS);
        }
        context.push_str(&text[boundaries[context_start]..boundaries[context_end]]);
        if context_end < char_count {
            context.push_str(ELLIPSIS);
        }
        hits.push(Hit { offset: first, context });
    }
    hits
}

fn chapter_matches(path: &Path, book: &Book, chapter: &Chapter, hits: Vec<Hit>) -> impl Iterator<Item = SearchMatch> {
    hits.into_iter().map(move |hit| SearchMatch {
        book_path: path.to_path_buf(),
        book_title: book.metadata.title.clone(),
        book_author: book.metadata.author.clone(),
        chapter_number: chapter.number,
        chapter_title: chapter.title.clone(),
        offset: hit.offset,
        context: hit.context,
    })
}

/// Searches every chapter of `book`, in chapter order, stopping after `limit`
/// matches in total.
pub(crate) fn search_book(
    path: &Path,
    book: &Book,
    query: &Query,
    context_chars: usize,
    limit: Option<usize>,
) -> Vec<SearchMatch> {
    let mut matches = Vec::new();
    for chapter in &book.chapters {
        let remaining = limit.map(|limit| limit.saturating_sub(matches.len()));
        if remaining == Some(0) {
            break;
        }
        let hits = find(&chapter.text, query, context_chars, remaining);
        matches.extend(chapter_matches(path, book, chapter, hits));
    }
    matches
}
