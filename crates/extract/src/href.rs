//! Resolution of document-relative references to archive entry names.

use std::borrow::Cow;

/// A reference to (a position inside) an archive entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Href {
    /// Archive entry name, e.g. `OEBPS/text/chapter01.xhtml`
    pub path: String,
    /// Fragment identifier without the `#`, if the reference had one
    pub fragment: Option<String>,
}

/// Directory part of an archive entry name (no trailing slash), or `""` at
/// the archive root.
pub(crate) fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

fn decode(s: &str) -> String {
    urlencoding::decode(s).map(Cow::into_owned).unwrap_or_else(|_| s.to_string())
}

fn is_external(href: &str) -> bool {
    href.split('/').next().is_some_and(|first| first.contains(':'))
}

/// Resolves `href`, as written inside the archive entry `from`, to an archive
/// entry name.
///
/// Percent-encoding is decoded, `.` and `..` segments are normalized (never
/// past the archive root), queries are dropped and the fragment split off.
/// A bare fragment refers back to `from` itself. External references
/// (`http:`, `mailto:` and friends) resolve to nothing.
pub(crate) fn resolve(from: &str, href: &str) -> Option<Href> {
    let href = href.trim();
    if href.is_empty() || is_external(href) {
        return None;
    }
    let (target, fragment) = match href.split_once('#') {
        Some((target, fragment)) => (target, Some(fragment)),
        None => (href, None),
    };
    let target = target.split_once('?').map_or(target, |(target, _query)| target);
    let fragment = fragment.filter(|f| !f.is_empty()).map(decode);
    if target.is_empty() {
        return Some(Href { path: from.to_string(), fragment });
    }
    let decoded = decode(target);
    let mut segments: Vec<&str> = if decoded.starts_with('/') {
        Vec::new()
    } else {
        parent_dir(from).split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                segments.pop();
            },
            segment => segments.push(segment),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(Href { path: segments.join("/"), fragment })
}
