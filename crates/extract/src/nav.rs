//! Table of contents: EPUB 3 navigation documents and EPUB 2 NCX files.
//!
//! Navigation only ever contributes titles (and split points); reading order
//! comes from the spine. Broken navigation therefore degrades to "no
//! entries" rather than failing the book.

use roxmltree::Node;
use scraper::Html;
use tracing::instrument;

use crate::consts;
use crate::href::{self, Href};
use crate::package::{decode, parse_xml, text_of};

/// One table of contents entry, flattened out of any nesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavEntry {
    /// Link text; `None` when blank
    pub title: Option<String>,
    pub target: Href,
}

fn collapse(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

const OPS_NAMESPACE: &str = "http://www.idpf.org/2007/ops";

fn is_toc(epub_type: Option<&str>, role: Option<&str>) -> bool {
    epub_type.is_some_and(|types| types.split_whitespace().any(|t| t == "toc"))
        || role.is_some_and(|role| role.trim() == "doc-toc")
}

/// Entries of an EPUB 3 navigation document at archive entry `path`.
///
/// Uses the `toc` nav, or the first `<nav>` when none is marked as such.
/// Well-formed documents are read as XHTML; anything else as HTML.
#[instrument(level = "debug", skip(bytes), fields(size = bytes.len()))]
pub fn from_nav_document(path: &str, bytes: &[u8]) -> Vec<NavEntry> {
    let text = decode(bytes);
    let entries = match parse_xml(&text) {
        Ok(document) => xhtml_entries(path, document.root_element()),
        Err(_) => html_entries(path, &Html::parse_document(&text)),
    };
    entries.unwrap_or_else(|| {
        tracing::warn!(path, "Navigation document has no <nav> element");
        Vec::new()
    })
}

fn elements<'a, 'input>(node: Node<'a, 'input>, name: &'static str) -> impl Iterator<Item = Node<'a, 'input>> {
    node.descendants().filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn xhtml_entries(path: &str, root: Node) -> Option<Vec<NavEntry>> {
    let navs: Vec<_> = elements(root, "nav").collect();
    let nav = navs
        .iter()
        .find(|nav| is_toc(nav.attribute((OPS_NAMESPACE, "type")), nav.attribute("role")))
        .or(navs.first())?;
    let entries = elements(*nav, "a")
        .filter_map(|link| {
            let target = href::resolve(path, link.attribute("href")?)?;
            Some(NavEntry { title: text_of(link), target })
        })
        .collect();
    Some(entries)
}

fn html_entries(path: &str, document: &Html) -> Option<Vec<NavEntry>> {
    let navs: Vec<_> = document.select(&consts::NAV_SELECTOR).collect();
    let nav = navs
        .iter()
        .find(|nav| is_toc(nav.value().attr("epub:type"), nav.value().attr("role")))
        .or(navs.first())?;
    let entries = nav
        .select(&consts::NAV_LINK_SELECTOR)
        .filter_map(|link| {
            let target = href::resolve(path, link.value().attr("href")?)?;
            Some(NavEntry { title: collapse(&link.text().collect::<String>()), target })
        })
        .collect();
    Some(entries)
}

/// Entries of an EPUB 2 NCX at archive entry `path`, `navPoint`s in document
/// order.
#[instrument(level = "debug", skip(bytes), fields(size = bytes.len()))]
pub fn from_ncx(path: &str, bytes: &[u8]) -> Vec<NavEntry> {
    let text = decode(bytes);
    let document = match parse_xml(&text) {
        Ok(document) => document,
        Err(error) => {
            tracing::warn!(path, %error, "Ignoring malformed NCX");
            return Vec::new();
        },
    };
    document
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "navPoint")
        .filter_map(|point| {
            let src = child(point, "content")?.attribute("src")?;
            let target = href::resolve(path, src)?;
            Some(NavEntry { title: child(point, "navLabel").and_then(text_of), target })
        })
        .collect()
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.is_element() && n.tag_name().name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, path: &str, fragment: Option<&str>) -> NavEntry {
        NavEntry {
            title: Some(title.to_string()),
            target: Href { path: path.to_string(), fragment: fragment.map(str::to_string) },
        }
    }

    #[test]
    fn test_nav_document_flattens_nested_lists() {
        let html = br#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
  <nav epub:type="landmarks"><ol><li><a href="text/cover.xhtml">Cover</a></li></ol></nav>
  <nav epub:type="toc">
    <ol>
      <li><a href="text/part1.xhtml">Part
          One</a>
        <ol>
          <li><a href="text/part1.xhtml#ch1">Chapter 1</a></li>
          <li><a href="text/part1.xhtml#ch2"><span>Chapter</span> 2</a></li>
        </ol>
      </li>
      <li><span>Unlinked heading</span></li>
      <li><a href="https://example.org">Website</a></li>
      <li><a href="text/part2.xhtml"> </a></li>
    </ol>
  </nav>
</body>
</html>"#;
        let entries = from_nav_document("OEBPS/nav.xhtml", html);
        assert_eq!(
            entries,
            vec![
                entry("Part One", "OEBPS/text/part1.xhtml", None),
                entry("Chapter 1", "OEBPS/text/part1.xhtml", Some("ch1")),
                entry("Chapter 2", "OEBPS/text/part1.xhtml", Some("ch2")),
                NavEntry { title: None, target: Href { path: "OEBPS/text/part2.xhtml".to_string(), fragment: None } },
            ]
        );
    }

    #[test]
    fn test_nav_document_falls_back_to_first_nav() {
        let html = br#"<html><body><nav><a href="a.xhtml">A</a></nav><nav><a href="b.xhtml">B</a></nav></body></html>"#;
        assert_eq!(from_nav_document("nav.xhtml", html), vec![entry("A", "a.xhtml", None)]);
    }

    #[test]
    fn test_nav_document_role_marks_toc() {
        let html = br#"<html><body><nav><a href="a.xhtml">A</a></nav><nav role="doc-toc"><a href="b.xhtml">B</a></nav></body></html>"#;
        assert_eq!(from_nav_document("nav.xhtml", html), vec![entry("B", "b.xhtml", None)]);
    }

    #[test]
    fn test_nav_document_self_closing_head_elements() {
        let xhtml = br#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title/><script src="nav.js"/></head>
<body>
  <nav epub:type="page-list"><a href="p1.xhtml">1</a></nav>
  <nav epub:type="toc"><ol><li><a href="c1.xhtml"><![CDATA[Fish & Chips]]></a></li></ol></nav>
</body>
</html>"#;
        assert_eq!(from_nav_document("nav.xhtml", xhtml), vec![entry("Fish & Chips", "c1.xhtml", None)]);
    }

    #[test]
    fn test_nav_document_tag_soup() {
        let html = br#"<html><body><nav epub:type="toc"><ol><li><a href="a.xhtml">A&nbsp;one</a><li><a href="b.xhtml">B</a></ol></nav>"#;
        assert_eq!(
            from_nav_document("nav.xhtml", html),
            vec![entry("A one", "a.xhtml", None), entry("B", "b.xhtml", None)]
        );
    }

    #[test]
    fn test_nav_document_without_nav() {
        assert!(from_nav_document("nav.xhtml", b"<html><body><p>no toc</p></body></html>").is_empty());
        assert!(from_nav_document("nav.xhtml", b"").is_empty());
    }

    #[test]
    fn test_ncx() {
        let ncx = br#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="p1" playOrder="1">
      <navLabel><text>Part One</text></navLabel>
      <content src="text/part1.xhtml"/>
      <navPoint id="c1" playOrder="2">
        <navLabel><text>Chapter 1</text></navLabel>
        <content src="text/part1.xhtml#ch1"/>
      </navPoint>
    </navPoint>
    <navPoint id="broken"><navLabel><text>No content</text></navLabel></navPoint>
  </navMap>
</ncx>"#;
        assert_eq!(
            from_ncx("OEBPS/toc.ncx", ncx),
            vec![
                entry("Part One", "OEBPS/text/part1.xhtml", None),
                entry("Chapter 1", "OEBPS/text/part1.xhtml", Some("ch1")),
            ]
        );
    }

    #[test]
    fn test_malformed_ncx_is_empty() {
        assert!(from_ncx("toc.ncx", b"<ncx><navMap><navPoint>").is_empty());
    }
}
