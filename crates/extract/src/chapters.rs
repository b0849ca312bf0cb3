//! Chapter resolution: spine order, navigation titles and anchor splitting.

use tokio_util::sync::CancellationToken;

use crate::archive::Archive;
use crate::error::{ErrorKind, Result};
use crate::models::{Chapter, Diagnostic, Href};
use crate::nav::{self, NavEntry};
use crate::package::{ManifestItem, Package};
use crate::text::{Segment, normalize, normalize_segments};

/// Knobs for [`read_book()`](crate::read_book).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResolveOptions {
    /// Split a content document into several chapters when the navigation
    /// points at two or more distinct anchors inside it.
    pub split_on_anchors: bool,
}
impl Default for ResolveOptions {
    fn default() -> Self {
        Self { split_on_anchors: true }
    }
}

/// A chapter before numbering.
struct Draft {
    title: Option<String>,
    text: String,
    source: Href,
}

/// Navigation entries, queried by target.
#[derive(Default)]
struct Navigation {
    entries: Vec<NavEntry>,
}
impl Navigation {
    fn load(archive: &mut Archive, package: &Package) -> Self {
        if let Some(item) = package.nav_item() {
            match archive.read(&item.path) {
                Ok(bytes) => {
                    let entries = nav::from_nav_document(&item.path, &bytes);
                    if !entries.is_empty() {
                        return Self { entries };
                    }
                },
                Err(error) => tracing::warn!(path = %item.path, error = %*error, "Navigation document unreadable"),
            }
        }
        if let Some(item) = package.ncx_item() {
            match archive.read(&item.path) {
                Ok(bytes) => return Self { entries: nav::from_ncx(&item.path, &bytes) },
                Err(error) => tracing::warn!(path = %item.path, error = %*error, "NCX unreadable"),
            }
        }
        Self::default()
    }

    /// Distinct fragments the navigation points at inside `path`, in
    /// navigation order.
    fn anchors_in(&self, path: &str) -> Vec<&str> {
        let mut anchors: Vec<&str> = Vec::new();
        for entry in self.entries.iter().filter(|entry| entry.target.path == path) {
            if let Some(fragment) = entry.target.fragment.as_deref()
                && !anchors.contains(&fragment)
            {
                anchors.push(fragment);
            }
        }
        anchors
    }

    /// Title of the first titled entry pointing exactly at `path#fragment`.
    fn title(&self, path: &str, fragment: Option<&str>) -> Option<String> {
        self.entries
            .iter()
            .filter(|entry| entry.target.path == path && entry.target.fragment.as_deref() == fragment)
            .find_map(|entry| entry.title.clone())
    }

    /// Title for a whole document: an entry without fragment, else the first
    /// entry pointing anywhere inside it.
    fn document_title(&self, path: &str) -> Option<String> {
        self.title(path, None).or_else(|| {
            self.entries.iter().filter(|entry| entry.target.path == path).find_map(|entry| entry.title.clone())
        })
    }
}

/// Spine items that are (X)HTML content documents, in spine order.
fn reading_order(package: &Package) -> Vec<&ManifestItem> {
    package
        .spine
        .iter()
        .filter_map(|itemref| {
            let Some(item) = package.manifest.get(&itemref.idref) else {
                tracing::warn!(idref = %itemref.idref, "Spine references an unknown manifest id; skipping");
                return None;
            };
            if !item.is_content_document() {
                tracing::debug!(path = %item.path, media_type = %item.media_type, "Skipping non-document spine item");
                return None;
            }
            Some(item)
        })
        .collect()
}

/// Splits a document at its navigation anchors, or returns `None` when fewer
/// than two of them are actually present.
fn split(path: &str, bytes: &[u8], anchors: &[&str], navigation: &Navigation) -> Option<(Vec<Draft>, Vec<String>)> {
    let (segments, diagnostics) = normalize_segments(bytes, anchors);
    if segments.len() < 3 {
        return None;
    }
    let drafts = segments
        .into_iter()
        .filter_map(|Segment { anchor, text }| match anchor {
            // Front matter before the first anchor only counts if there is any.
            None if text.is_empty() => None,
            None => Some(Draft {
                title: navigation.title(path, None),
                text,
                source: Href { path: path.to_string(), fragment: None },
            }),
            Some(anchor) => Some(Draft {
                title: navigation.title(path, Some(&anchor)),
                text,
                source: Href { path: path.to_string(), fragment: Some(anchor) },
            }),
        })
        .collect();
    Some((drafts, diagnostics))
}

/// Resolves the ordered, numbered chapter list of a book.
///
/// # Errors
///
/// - [`ContentDocumentMissing`](ErrorKind::ContentDocumentMissing) if a
///   spine document is not in the archive.
/// - [`Cancelled`](ErrorKind::Cancelled) if `cancel` fires between documents.
pub(crate) fn resolve(
    archive: &mut Archive,
    package: &Package,
    options: &ResolveOptions,
    cancel: &CancellationToken,
) -> Result<(Vec<Chapter>, Vec<Diagnostic>)> {
    let navigation = Navigation::load(archive, package);
    let mut drafts: Vec<Draft> = Vec::new();
    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    for item in reading_order(package) {
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let path = item.path.as_str();
        let bytes = match archive.read(path) {
            Ok(bytes) => bytes,
            Err(error) if matches!(&*error, ErrorKind::CorruptEntry(_)) => {
                tracing::warn!(document = path, error = %*error, "Content document unreadable; chapter will be empty");
                diagnostics.push(Diagnostic { document: path.to_string(), message: (*error).to_string() });
                Vec::new()
            },
            Err(error) => return Err(error),
        };

        let anchors = if options.split_on_anchors { navigation.anchors_in(path) } else { Vec::new() };
        let pieces = if anchors.len() >= 2 { split(path, &bytes, &anchors, &navigation) } else { None };
        let document_diagnostics = match pieces {
            Some((segments, document_diagnostics)) => {
                drafts.extend(segments);
                document_diagnostics
            },
            None => {
                let normalized = normalize(&bytes);
                drafts.push(Draft {
                    title: navigation.document_title(path),
                    text: normalized.text,
                    source: Href { path: path.to_string(), fragment: None },
                });
                normalized.diagnostics
            },
        };
        if !document_diagnostics.is_empty() {
            tracing::debug!(document = path, count = document_diagnostics.len(), "Markup recovered with diagnostics");
        }
        diagnostics.extend(
            document_diagnostics.into_iter().map(|message| Diagnostic { document: path.to_string(), message }),
        );
    }

    let chapters = drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| Chapter { number: index + 1, title: draft.title, text: draft.text, source: draft.source })
        .collect();
    Ok((chapters, diagnostics))
}
