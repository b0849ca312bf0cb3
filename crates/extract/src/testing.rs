//! In-memory EPUB fixtures.
//!
//! Builds small but structurally real EPUB archives with the `zip` writer,
//! including the broken variants ingestion has to cope with. Everything
//! panics on failure: this is test support, and a fixture that can't be
//! built is a broken test.

use std::io::{Cursor, Write};

use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const OEBPS: &str = "OEBPS";

enum Toc {
    Nav,
    Ncx,
    None,
}

enum Container {
    Standard,
    Rootfile(String),
    Missing,
}

enum PackageDocument {
    Generated,
    Raw(String),
    Missing,
}

struct TestDocument {
    id: String,
    href: String,
    media_type: String,
    content: String,
    linear: bool,
}

/// Builder for EPUB archive bytes.
///
/// Hrefs given to the builder are relative to the `OEBPS/` directory that
/// holds the package document.
///
/// ```
/// use folio_extract::testing::EpubBuilder;
///
/// let bytes = EpubBuilder::new()
///     .title("Test Book")
///     .creator("A. Author")
///     .chapter("Chapter 1", "<p>Hello world.</p>")
///     .chapter("Chapter 2", "<p>Goodbye world.</p>")
///     .build();
/// assert_eq!(&bytes[..2], b"PK");
/// ```
pub struct EpubBuilder {
    metadata: Vec<(&'static str, String)>,
    documents: Vec<TestDocument>,
    nav: Vec<(String, String)>,
    toc: Toc,
    container: Container,
    package: PackageDocument,
    unknown_spine_ids: Vec<String>,
    omitted: Vec<String>,
    corrupted: Vec<String>,
}

impl Default for EpubBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EpubBuilder {
    pub fn new() -> Self {
        Self {
            metadata: Vec::new(),
            documents: Vec::new(),
            nav: Vec::new(),
            toc: Toc::Nav,
            container: Container::Standard,
            package: PackageDocument::Generated,
            unknown_spine_ids: Vec::new(),
            omitted: Vec::new(),
            corrupted: Vec::new(),
        }
    }

    /// Adds a Dublin Core element (`title`, `creator`, `language`, ...).
    pub fn dc(mut self, element: &'static str, value: impl Into<String>) -> Self {
        self.metadata.push((element, value.into()));
        self
    }

    pub fn title(self, title: impl Into<String>) -> Self {
        self.dc("title", title)
    }

    pub fn creator(self, creator: impl Into<String>) -> Self {
        self.dc("creator", creator)
    }

    pub fn language(self, language: impl Into<String>) -> Self {
        self.dc("language", language)
    }

    /// Adds a spine document `chapterN.xhtml` with the given body markup, and
    /// a navigation entry titled `title` pointing at it.
    pub fn chapter(mut self, title: impl Into<String>, body: impl AsRef<str>) -> Self {
        let href = format!("chapter{}.xhtml", self.documents.len() + 1);
        self.nav.push((title.into(), href.clone()));
        self.document(href, body)
    }

    /// Adds a spine document without any navigation entry.
    pub fn document(mut self, href: impl Into<String>, body: impl AsRef<str>) -> Self {
        let href = href.into();
        let content = xhtml(&href, body.as_ref());
        self.push(href, "application/xhtml+xml", content, true);
        self
    }

    /// Adds a `linear="no"` spine document without any navigation entry.
    pub fn non_linear(mut self, href: impl Into<String>, body: impl AsRef<str>) -> Self {
        let href = href.into();
        let content = xhtml(&href, body.as_ref());
        self.push(href, "application/xhtml+xml", content, false);
        self
    }

    /// Adds a spine item that isn't a content document (an image, say).
    pub fn spine_resource(mut self, href: impl Into<String>, media_type: impl Into<String>) -> Self {
        let media_type = media_type.into();
        self.push(href.into(), &media_type, "not markup".to_string(), true);
        self
    }

    /// Adds a navigation entry; `target` may carry a fragment.
    pub fn nav_entry(mut self, title: impl Into<String>, target: impl Into<String>) -> Self {
        self.nav.push((title.into(), target.into()));
        self
    }

    /// Writes navigation as an EPUB 2 NCX instead of an EPUB 3 nav document.
    pub fn ncx(mut self) -> Self {
        self.toc = Toc::Ncx;
        self
    }

    pub fn without_nav(mut self) -> Self {
        self.toc = Toc::None;
        self
    }

    pub fn without_container(mut self) -> Self {
        self.container = Container::Missing;
        self
    }

    /// Points the container at a different rootfile (archive-root relative).
    pub fn container_rootfile(mut self, full_path: impl Into<String>) -> Self {
        self.container = Container::Rootfile(full_path.into());
        self
    }

    pub fn without_package(mut self) -> Self {
        self.package = PackageDocument::Missing;
        self
    }

    /// Replaces the generated package document with arbitrary text.
    pub fn raw_package(mut self, xml: impl Into<String>) -> Self {
        self.package = PackageDocument::Raw(xml.into());
        self
    }

    /// Appends a spine `itemref` naming an id the manifest doesn't declare.
    pub fn unknown_spine_id(mut self, idref: impl Into<String>) -> Self {
        self.unknown_spine_ids.push(idref.into());
        self
    }

    /// Declares the document in the manifest but leaves it out of the zip.
    pub fn omit(mut self, href: impl Into<String>) -> Self {
        self.omitted.push(href.into());
        self
    }

    /// Stores the document uncompressed and damages its bytes, so reading it
    /// fails the entry checksum.
    pub fn corrupt(mut self, href: impl Into<String>) -> Self {
        self.corrupted.push(href.into());
        self
    }

    fn push(&mut self, href: String, media_type: &str, content: String, linear: bool) {
        self.documents.push(TestDocument {
            id: format!("doc{}", self.documents.len() + 1),
            href,
            media_type: media_type.to_string(),
            content,
            linear,
        });
    }

    pub fn build(self) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        put(&mut writer, "mimetype", stored, "application/epub+zip");
        match &self.container {
            Container::Standard => put(&mut writer, "META-INF/container.xml", deflated, &container(&format!("{OEBPS}/content.opf"))),
            Container::Rootfile(path) => put(&mut writer, "META-INF/container.xml", deflated, &container(path)),
            Container::Missing => {},
        }
        match &self.package {
            PackageDocument::Generated => put(&mut writer, &format!("{OEBPS}/content.opf"), deflated, &self.package_xml()),
            PackageDocument::Raw(xml) => put(&mut writer, &format!("{OEBPS}/content.opf"), deflated, xml),
            PackageDocument::Missing => {},
        }
        match self.toc {
            Toc::Nav => put(&mut writer, &format!("{OEBPS}/nav.xhtml"), deflated, &self.nav_xhtml()),
            Toc::Ncx => put(&mut writer, &format!("{OEBPS}/toc.ncx"), deflated, &self.ncx_xml()),
            Toc::None => {},
        }
        for document in &self.documents {
            if self.omitted.contains(&document.href) {
                continue;
            }
            let options = if self.corrupted.contains(&document.href) { stored } else { deflated };
            put(&mut writer, &format!("{OEBPS}/{}", document.href), options, &document.content);
        }
        let mut bytes = writer.finish().expect("finishing in-memory zip").into_inner();

        for document in self.documents.iter().filter(|d| self.corrupted.contains(&d.href)) {
            let needle = document.content.as_bytes();
            let position = bytes
                .windows(needle.len())
                .position(|window| window == needle)
                .expect("stored document bytes appear verbatim in the archive");
            // Damage the `<?xml` declaration: still plausible text, wrong CRC.
            bytes[position + 1] = b'!';
        }
        bytes
    }

    fn package_xml(&self) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\" unique-identifier=\"uid\">\n<metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n",
        );
        for (element, value) in &self.metadata {
            let id = if *element == "identifier" { " id=\"uid\"" } else { "" };
            xml.push_str(&format!("<dc:{element}{id}>{}</dc:{element}>\n", escape(value)));
        }
        xml.push_str("</metadata>\n<manifest>\n");
        match self.toc {
            Toc::Nav => xml.push_str("<item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n"),
            Toc::Ncx => xml.push_str("<item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n"),
            Toc::None => {},
        }
        for document in &self.documents {
            xml.push_str(&format!(
                "<item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
                document.id,
                escape(&document.href),
                escape(&document.media_type)
            ));
        }
        xml.push_str("</manifest>\n");
        xml.push_str(if matches!(self.toc, Toc::Ncx) { "<spine toc=\"ncx\">\n" } else { "<spine>\n" });
        for document in &self.documents {
            let linear = if document.linear { "" } else { " linear=\"no\"" };
            xml.push_str(&format!("<itemref idref=\"{}\"{linear}/>\n", document.id));
        }
        for idref in &self.unknown_spine_ids {
            xml.push_str(&format!("<itemref idref=\"{}\"/>\n", escape(idref)));
        }
        xml.push_str("</spine>\n</package>\n");
        xml
    }

    fn nav_xhtml(&self) -> String {
        let items: String = self
            .nav
            .iter()
            .map(|(title, target)| format!("<li><a href=\"{}\">{}</a></li>\n", escape(target), escape(title)))
            .collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n<head><title>Contents</title></head>\n<body>\n<nav epub:type=\"toc\" id=\"toc\"><h1>Contents</h1>\n<ol>\n{items}</ol>\n</nav>\n</body>\n</html>\n"
        )
    }

    fn ncx_xml(&self) -> String {
        let points: String = self
            .nav
            .iter()
            .enumerate()
            .map(|(i, (title, target))| {
                format!(
                    "<navPoint id=\"np{n}\" playOrder=\"{n}\"><navLabel><text>{}</text></navLabel><content src=\"{}\"/></navPoint>\n",
                    escape(title),
                    escape(target),
                    n = i + 1
                )
            })
            .collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n<head/>\n<docTitle><text>Contents</text></docTitle>\n<navMap>\n{points}</navMap>\n</ncx>\n"
        )
    }
}

fn put(writer: &mut ZipWriter<Cursor<Vec<u8>>>, name: &str, options: SimpleFileOptions, content: &str) {
    writer.start_file(name, options).expect("starting in-memory zip entry");
    writer.write_all(content.as_bytes()).expect("writing in-memory zip entry");
}

fn container(full_path: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n<rootfiles>\n<rootfile full-path=\"{}\" media-type=\"application/oebps-package+xml\"/>\n</rootfiles>\n</container>\n",
        escape(full_path)
    )
}

fn xhtml(href: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">\n<head><title>{}</title><style>p {{ margin: 0 }}</style></head>\n<body>\n{body}\n</body>\n</html>\n",
        escape(href)
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}
