/// Descriptive metadata of a book, with defaults already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Metadata {
    /// First `dc:title`, or the file name without its extension
    pub title: String,
    /// Every `dc:creator` in document order, joined with `", "`; `"Unknown"`
    /// when there are none
    pub author: String,
    /// First `dc:language`
    pub language: Option<String>,
    /// The package's unique identifier (ISBN, UUID, ...)
    pub identifier: Option<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
}
impl Metadata {
    pub const UNKNOWN_AUTHOR: &'static str = "Unknown";

    /// Metadata for a book whose package could not be read at all.
    pub fn fallback(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: Self::UNKNOWN_AUTHOR.to_string(),
            language: None,
            identifier: None,
            publisher: None,
            description: None,
        }
    }
}
