//! Markup to plain text.
//!
//! Content documents are read as XML first, which is what well-formed XHTML
//! needs (`<script/>` and `<title/>` close themselves, CDATA sections are
//! text). Anything that isn't well-formed goes through a tolerant HTML5
//! parser instead, so tag soup never fails ingestion: whatever the parser had
//! to recover from comes back as diagnostics alongside the text.

use std::collections::HashSet;
use std::mem;

use scraper::{ElementRef, Html, Node};
use tracing::instrument;

use crate::package::{decode, parse_xml};

/// Elements whose content never reaches the text.
const SKIPPED_ELEMENTS: &[&str] = &["head", "script", "style", "template", "noscript"];

/// Elements that start and end a paragraph.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "caption", "dd", "details", "div", "dl", "dt",
    "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "html", "li", "main",
    "nav", "ol", "p", "pre", "section", "summary", "table", "tbody", "td", "tfoot", "th", "thead", "tr", "ul",
];

/// Plain text of one content document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    /// Paragraphs joined with `\n`; whitespace collapsed within each
    pub text: String,
    /// Parser error-recovery notes; informational only
    pub diagnostics: Vec<String>,
}

/// A run of text starting at an anchor (or at the start of the document).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Segment {
    pub anchor: Option<String>,
    pub text: String,
}

/// Converts a content document to plain text.
///
/// `head`, `script`, `style`, `template` and `noscript` are dropped; block
/// elements and `<br>` end a paragraph; runs of whitespace inside a paragraph
/// become one space; empty paragraphs are dropped.
///
/// ```
/// use folio_extract::normalize;
/// let html = b"<html><head><title>x</title></head><body><h1>One</h1>\n<p>Hello,\n   <em>world</em>&amp;c.</p><p> </p></body></html>";
/// assert_eq!(normalize(html).text, "One\nHello, world&c.");
/// ```
#[instrument(level = "trace", skip(bytes), fields(size = bytes.len()))]
pub fn normalize(bytes: &[u8]) -> Normalized {
    let (mut segments, diagnostics) = normalize_segments(bytes, &[]);
    let text = segments.pop().map(|segment| segment.text).unwrap_or_default();
    Normalized { text, diagnostics }
}

/// Converts a content document to plain text, cut at the first occurrence of
/// each of `anchors` (matched against `id`, and `name` on `<a>`).
///
/// The first segment is whatever precedes the first anchor found (possibly
/// empty) and has no anchor; each anchor actually present in the document
/// starts one further segment, in document order.
pub(crate) fn normalize_segments(bytes: &[u8], anchors: &[&str]) -> (Vec<Segment>, Vec<String>) {
    let text = decode(bytes);
    let xml_error = match parse_xml(&text) {
        Ok(document) => return (walk(document.root_element(), anchors), Vec::new()),
        Err(err) => err,
    };
    let document = Html::parse_document(&text);
    let segments = walk(document.root_element(), anchors);
    let mut diagnostics = Vec::with_capacity(document.errors.len() + 1);
    if text.trim_start().starts_with("<?xml") {
        diagnostics.push(format!("not well-formed XML: {xml_error}"));
    }
    diagnostics.extend(document.errors.iter().map(|error| error.to_string()));
    (segments, diagnostics)
}

/// An element from either parser's tree.
trait Element<'a>: Copy {
    /// Local name, without any namespace.
    fn name(self) -> &'a str;
    fn attribute(self, name: &str) -> Option<&'a str>;
    /// Pushes child elements and text, last first.
    fn push_children(self, stack: &mut Vec<Step<'a, Self>>);

    fn anchor(self) -> Option<&'a str> {
        self.attribute("id").or_else(|| if self.name() == "a" { self.attribute("name") } else { None })
    }
}

impl<'a> Element<'a> for ElementRef<'a> {
    fn name(self) -> &'a str {
        self.value().name()
    }

    fn attribute(self, name: &str) -> Option<&'a str> {
        self.value().attr(name)
    }

    fn push_children(self, stack: &mut Vec<Step<'a, Self>>) {
        for child in self.children().rev() {
            match child.value() {
                Node::Text(text) => stack.push(Step::Text(text)),
                Node::Element(_) => stack.extend(ElementRef::wrap(child).map(Step::Open)),
                _ => {},
            }
        }
    }
}

impl<'a, 'input: 'a> Element<'a> for roxmltree::Node<'a, 'input> {
    fn name(self) -> &'a str {
        self.tag_name().name()
    }

    fn attribute(self, name: &str) -> Option<&'a str> {
        roxmltree::Node::attribute(&self, name)
    }

    fn push_children(self, stack: &mut Vec<Step<'a, Self>>) {
        for child in self.children().rev() {
            if child.is_element() {
                stack.push(Step::Open(child));
            } else if let Some(text) = child.is_text().then(|| child.text()).flatten() {
                stack.push(Step::Text(text));
            }
        }
    }
}

enum Step<'a, E> {
    Open(E),
    Text(&'a str),
    Close { block: bool },
}

/// Depth-first walk with an explicit stack: nesting depth in the wild is
/// unbounded.
fn walk<'a, E: Element<'a>>(root: E, anchors: &[&str]) -> Vec<Segment> {
    let mut writer = TextWriter::default();
    let mut segments = Vec::new();
    let mut current_anchor: Option<String> = None;
    let mut seen: HashSet<&'a str> = HashSet::new();
    let mut stack = vec![Step::Open(root)];

    while let Some(step) = stack.pop() {
        let element = match step {
            Step::Text(text) => {
                writer.text(text);
                continue;
            },
            Step::Close { block } => {
                if block {
                    writer.break_paragraph();
                }
                continue;
            },
            Step::Open(element) => element,
        };
        let name = element.name();
        if SKIPPED_ELEMENTS.contains(&name) {
            continue;
        }
        if let Some(anchor) = element.anchor()
            && anchors.contains(&anchor)
            && seen.insert(anchor)
        {
            segments.push(Segment { anchor: current_anchor.take(), text: writer.finish() });
            current_anchor = Some(anchor.to_string());
        }
        if name == "br" {
            writer.break_paragraph();
            continue;
        }
        let block = BLOCK_ELEMENTS.contains(&name);
        if block {
            writer.break_paragraph();
        }
        stack.push(Step::Close { block });
        element.push_children(&mut stack);
    }
    segments.push(Segment { anchor: current_anchor, text: writer.finish() });
    segments
}

#[derive(Default)]
struct TextWriter {
    paragraphs: Vec<String>,
    current: String,
    pending_space: bool,
}
impl TextWriter {
    fn text(&mut self, text: &str) {
        for c in text.chars() {
            if c.is_whitespace() {
                self.pending_space = !self.current.is_empty();
                continue;
            }
            if mem::take(&mut self.pending_space) {
                self.current.push(' ');
            }
            self.current.push(c);
        }
    }

    fn break_paragraph(&mut self) {
        if !self.current.is_empty() {
            self.paragraphs.push(mem::take(&mut self.current));
        }
        self.pending_space = false;
    }

    /// Returns everything written since the last call.
    fn finish(&mut self) -> String {
        self.break_paragraph();
        mem::take(&mut self.paragraphs).join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn text(html: &str) -> String {
        normalize(html.as_bytes()).text
    }

    #[rstest]
    #[case::paragraphs("<p>One</p><p>Two</p>", "One\nTwo")]
    #[case::inline_elements("<p>Hello, <em>wide</em> <strong>world</strong>.</p>", "Hello, wide world.")]
    #[case::whitespace_runs("<p>  lots\n\t of   space  </p>", "lots of space")]
    #[case::line_breaks("<p>roses are red<br/>violets are blue</p>", "roses are red\nviolets are blue")]
    #[case::empty_paragraphs("<p>a</p><p>   </p><div><p></p></div><p>b</p>", "a\nb")]
    #[case::entities("<p>Fish &amp; chips &lt;3 &#8212; caf&eacute;</p>", "Fish & chips <3 \u{2014} café")]
    #[case::nbsp_collapses("<p>a&nbsp;&nbsp; b</p>", "a b")]
    #[case::nested_blocks("<div>outer<div>inner</div>tail</div>", "outer\ninner\ntail")]
    #[case::lists("<ul><li>one</li><li>two</li></ul>", "one\ntwo")]
    #[case::dropped_elements(
        "<script>var x = 1;</script><style>p{}</style><noscript>enable js</noscript><p>kept</p>",
        "kept"
    )]
    #[case::empty_document("", "")]
    fn test_normalize(#[case] body: &str, #[case] expected: &str) {
        let html = format!("<html><head><title>ignored</title></head><body>{body}</body></html>");
        assert_eq!(text(&html), expected);
    }

    #[test]
    fn test_xhtml_document() {
        let xhtml = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>Chapter</title></head><body><h2>I</h2><p>It was a dark night.</p></body></html>";
        assert_eq!(text(xhtml), "I\nIt was a dark night.");
    }

    const XHTML_HEAD: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">";

    #[rstest]
    #[case::self_closing_title("<head><title/></head><body><p>Kept</p></body>", "Kept")]
    #[case::self_closing_script("<head><script src=\"a.js\"/></head><body><p>Kept</p><script/><p>too</p></body>", "Kept\ntoo")]
    #[case::self_closing_body_script("<body><script type=\"text/javascript\"/><p>one</p><p>two</p></body>", "one\ntwo")]
    #[case::cdata("<body><p><![CDATA[1 < 2 & so on]]></p></body>", "1 < 2 & so on")]
    #[case::cdata_in_script("<body><script><![CDATA[if (a < b) {}]]></script><p>after</p></body>", "after")]
    #[case::self_closing_anchor("<body><p>a<a id=\"x\"/>b</p></body>", "ab")]
    fn test_well_formed_xhtml(#[case] body: &str, #[case] expected: &str) {
        let normalized = normalize(format!("{XHTML_HEAD}{body}</html>").as_bytes());
        assert_eq!(normalized.text, expected);
        assert!(normalized.diagnostics.is_empty());
    }

    #[test]
    fn test_malformed_xhtml_falls_back_to_html() {
        let normalized = normalize(format!("{XHTML_HEAD}<body><p>caf&eacute;<br></p></body></html>").as_bytes());
        assert_eq!(normalized.text, "café");
        assert!(normalized.diagnostics[0].starts_with("not well-formed XML"));
    }

    #[test]
    fn test_xhtml_segments_split_at_anchors() {
        let xhtml = format!("{XHTML_HEAD}<body><p>Preface</p><h2 id=\"one\"/><p>first</p><script/><p id=\"two\">second</p></body></html>");
        let (segments, diagnostics) = normalize_segments(xhtml.as_bytes(), &["one", "two"]);
        assert!(diagnostics.is_empty());
        let texts: Vec<_> = segments.iter().map(|segment| segment.text.as_str()).collect();
        assert_eq!(texts, ["Preface", "first", "second"]);
    }

    #[test]
    fn test_tag_soup_recovers_with_diagnostics() {
        let normalized = normalize(b"<p>unclosed <b>bold <i>both</p><p>next</div></p>");
        assert_eq!(normalized.text, "unclosed bold both\nnext");
        assert!(!normalized.diagnostics.is_empty());
    }

    #[test]
    fn test_invalid_utf8_and_bom() {
        let mut bytes = b"\xEF\xBB\xBF<p>caf".to_vec();
        bytes.extend_from_slice(b"\xFF</p>");
        assert_eq!(normalize(&bytes).text, "caf\u{FFFD}");
    }

    #[test]
    fn test_is_deterministic() {
        let html = b"<p>Same <i>input</i></p><p>same output</p>";
        assert_eq!(normalize(html), normalize(html));
    }

    #[test]
    fn test_deep_nesting() {
        let html = format!("{}deep{}", "<div>".repeat(5_000), "</div>".repeat(5_000));
        assert_eq!(text(&html), "deep");
    }

    #[test]
    fn test_segments_split_at_anchors() {
        let html = b"<p>Preface</p><h2 id=\"one\">One</h2><p>first</p><h2><a name=\"two\"></a>Two</h2><p>second</p>";
        let (segments, _) = normalize_segments(html, &["two", "one", "missing"]);
        assert_eq!(
            segments,
            vec![
                Segment { anchor: None, text: "Preface".to_string() },
                Segment { anchor: Some("one".to_string()), text: "One\nfirst".to_string() },
                Segment { anchor: Some("two".to_string()), text: "Two\nsecond".to_string() },
            ]
        );
    }

    #[test]
    fn test_segments_repeated_anchor_splits_once() {
        let html = b"<p id=\"a\">x</p><p id=\"a\">y</p>";
        let (segments, _) = normalize_segments(html, &["a"]);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "");
        assert_eq!(segments[1].text, "x\ny");
    }
}
