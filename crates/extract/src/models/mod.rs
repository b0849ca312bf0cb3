mod book;
mod chapter;
mod metadata;

pub use self::book::{Book, Diagnostic};
pub use self::chapter::Chapter;
pub use self::metadata::Metadata;
pub use crate::href::Href;
