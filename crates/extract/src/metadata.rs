//! Descriptive metadata with defaults for whatever the package leaves out.

use std::path::Path;

use crate::models::Metadata;
use crate::package::DublinCore;

/// Title used when a book's package has no `dc:title`: the file name without
/// its extension.
///
/// ```
/// use folio_extract::fallback_title;
/// assert_eq!(fallback_title("Le Guin/The Dispossessed.epub"), "The Dispossessed");
/// assert_eq!(fallback_title("notes"), "notes");
/// ```
pub fn fallback_title(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Builds [`Metadata`] from the package's Dublin Core block. Never fails:
/// missing values fall back to defaults.
pub(crate) fn extract(dublin_core: &DublinCore, path: &Path) -> Metadata {
    let mut metadata = Metadata::fallback(dublin_core.title.clone().unwrap_or_else(|| fallback_title(path)));
    if !dublin_core.creators.is_empty() {
        metadata.author = dublin_core.creators.join(", ");
    }
    metadata.language = dublin_core.language.clone();
    metadata.identifier = dublin_core.identifier.clone();
    metadata.publisher = dublin_core.publisher.clone();
    metadata.description = dublin_core.description.clone();
    metadata
}
