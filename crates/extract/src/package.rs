//! OPF package document parsing: Dublin Core block, manifest and spine.

use std::borrow::Cow;
use std::collections::HashMap;

use exn::ResultExt;
use roxmltree::{Document, Node, ParsingOptions};

use crate::error::{ErrorKind, Result};
use crate::href::{self, Href};

pub(crate) const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";
pub(crate) const HTML_MEDIA_TYPE: &str = "text/html";
pub(crate) const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// Decodes an XML or XHTML entry: UTF-16 when it starts with a UTF-16 byte
/// order mark, UTF-8 otherwise, with the BOM stripped and invalid sequences
/// replaced with U+FFFD.
pub(crate) fn decode(bytes: &[u8]) -> Cow<'_, str> {
    if let Some(rest) = bytes.strip_prefix(b"\xFF\xFE") {
        return Cow::Owned(decode_utf16(rest, u16::from_le_bytes));
    }
    if let Some(rest) = bytes.strip_prefix(b"\xFE\xFF") {
        return Cow::Owned(decode_utf16(rest, u16::from_be_bytes));
    }
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes)
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let chunks = bytes.chunks_exact(2);
    let odd = !chunks.remainder().is_empty();
    let mut text: String = char::decode_utf16(chunks.map(|pair| unit([pair[0], pair[1]])))
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    if odd {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

/// Parses XML, allowing (but not loading) a DTD. Plenty of EPUB 2 packages
/// and NCX files carry a `<!DOCTYPE>`.
pub(crate) fn parse_xml(text: &str) -> std::result::Result<Document<'_>, roxmltree::Error> {
    let mut options = ParsingOptions::default();
    options.allow_dtd = true;
    Document::parse_with_options(text, options)
}

/// Concatenated, whitespace-collapsed text of an element; `None` when blank.
pub(crate) fn text_of(node: Node) -> Option<String> {
    let raw: String = node.descendants().filter(Node::is_text).filter_map(|n| n.text()).collect();
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Raw Dublin Core values, before any defaults are applied.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DublinCore {
    pub title: Option<String>,
    pub creators: Vec<String>,
    pub language: Option<String>,
    pub identifier: Option<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// Archive entry name the item's `href` resolves to
    pub path: String,
    pub media_type: String,
    pub properties: Vec<String>,
}
impl ManifestItem {
    /// Whether the item is an (X)HTML content document.
    pub fn is_content_document(&self) -> bool {
        let media_type = self.media_type.trim();
        media_type.eq_ignore_ascii_case(XHTML_MEDIA_TYPE) || media_type.eq_ignore_ascii_case(HTML_MEDIA_TYPE)
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    pub idref: String,
    /// `false` for `linear="no"`; such items still keep their place
    pub linear: bool,
}

/// The parsed package document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Archive entry name of the package document itself
    pub path: String,
    pub dublin_core: DublinCore,
    /// Items by id
    pub manifest: HashMap<String, ManifestItem>,
    pub spine: Vec<SpineItem>,
    /// Manifest id named by the spine's `toc` attribute (EPUB 2 NCX)
    pub spine_toc: Option<String>,
}
impl Package {
    /// Parses the package document found at archive entry `path`.
    ///
    /// # Errors
    ///
    /// [`ManifestMalformed`](ErrorKind::ManifestMalformed) when the document
    /// is not well-formed XML or its root element isn't `<package>`.
    pub fn parse(path: &str, bytes: &[u8]) -> Result<Self> {
        let text = decode(bytes);
        let document = parse_xml(&text).or_raise(|| ErrorKind::ManifestMalformed(path.to_string()))?;
        let root = document.root_element();
        if root.tag_name().name() != "package" {
            exn::bail!(ErrorKind::ManifestMalformed(format!(
                "{path}: root element is <{}>, not <package>",
                root.tag_name().name()
            )));
        }
        let dublin_core = child(root, "metadata")
            .map(|metadata| self::dublin_core(metadata, root.attribute("unique-identifier")))
            .unwrap_or_default();
        let manifest = child(root, "manifest").map(|manifest| self::manifest(manifest, path)).unwrap_or_default();
        let spine_element = child(root, "spine");
        Ok(Self {
            path: path.to_string(),
            dublin_core,
            manifest,
            spine: spine_element.map(self::spine).unwrap_or_default(),
            spine_toc: spine_element.and_then(|spine| spine.attribute("toc")).map(str::to_string),
        })
    }

    /// Resolves an `href` written inside the package document.
    pub fn resolve(&self, href: &str) -> Option<Href> {
        href::resolve(&self.path, href)
    }

    /// The EPUB 3 navigation document, if the manifest declares one.
    pub fn nav_item(&self) -> Option<&ManifestItem> {
        self.sorted_items().into_iter().find(|item| item.has_property("nav"))
    }

    /// The EPUB 2 NCX: the spine's `toc` item, else any item of the NCX
    /// media type.
    pub fn ncx_item(&self) -> Option<&ManifestItem> {
        self.spine_toc.as_ref().and_then(|id| self.manifest.get(id)).or_else(|| {
            self.sorted_items().into_iter().find(|item| item.media_type.trim().eq_ignore_ascii_case(NCX_MEDIA_TYPE))
        })
    }

    /// Manifest items in a stable (id) order, so lookups over the map don't
    /// depend on hashing.
    fn sorted_items(&self) -> Vec<&ManifestItem> {
        let mut items: Vec<_> = self.manifest.values().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.is_element() && n.tag_name().name() == name)
}

fn dublin_core(metadata: Node, unique_identifier: Option<&str>) -> DublinCore {
    let mut dc = DublinCore::default();
    let mut identifiers = Vec::new();
    for node in metadata.descendants().filter(Node::is_element) {
        let Some(value) = text_of(node) else {
            continue;
        };
        match node.tag_name().name() {
            "title" if dc.title.is_none() => dc.title = Some(value),
            "creator" => dc.creators.push(value),
            "language" if dc.language.is_none() => dc.language = Some(value),
            "identifier" => identifiers.push((node.attribute("id"), value)),
            "publisher" if dc.publisher.is_none() => dc.publisher = Some(value),
            "description" if dc.description.is_none() => dc.description = Some(value),
            _ => {},
        }
    }
    // The package's own identifier wins over ISBNs and friends listed first.
    let position = unique_identifier
        .and_then(|unique| identifiers.iter().position(|(id, _)| *id == Some(unique)))
        .unwrap_or(0);
    if position < identifiers.len() {
        dc.identifier = Some(identifiers.swap_remove(position).1);
    }
    dc
}

fn manifest(manifest: Node, package_path: &str) -> HashMap<String, ManifestItem> {
    let mut items = HashMap::new();
    for node in manifest.children().filter(|n| n.is_element() && n.tag_name().name() == "item") {
        let (Some(id), Some(href)) = (node.attribute("id"), node.attribute("href")) else {
            tracing::debug!("Skipping manifest item without id or href");
            continue;
        };
        let Some(resolved) = href::resolve(package_path, href) else {
            tracing::debug!(id, href, "Skipping manifest item with external href");
            continue;
        };
        let item = ManifestItem {
            id: id.to_string(),
            path: resolved.path,
            media_type: node.attribute("media-type").unwrap_or_default().to_string(),
            properties: node.attribute("properties").unwrap_or_default().split_whitespace().map(str::to_string).collect(),
        };
        // First declaration of a duplicated id wins.
        items.entry(item.id.clone()).or_insert(item);
    }
    items
}

fn spine(spine: Node) -> Vec<SpineItem> {
    spine
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "itemref")
        .filter_map(|node| {
            Some(SpineItem {
                idref: node.attribute("idref")?.to_string(),
                linear: node.attribute("linear").is_none_or(|linear| linear.trim() != "no"),
            })
        })
        .collect()
}
