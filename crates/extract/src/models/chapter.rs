use super::Href;

/// One unit of a book's resolved reading sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Chapter {
    /// 1-based, dense and contiguous within a book
    pub number: usize,
    /// Title from the navigation document, if it lists this chapter
    pub title: Option<String>,
    /// Normalized plain text: one paragraph per line
    pub text: String,
    /// Content document the chapter comes from. The fragment is set when the
    /// document was split and this chapter starts at that anchor.
    pub source: Href,
}
impl Chapter {
    /// Number of characters (not bytes) of text.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}
