//! Zip container access: locating the package document and reading entries
//! on demand.

use std::io::{Cursor, Read};

use exn::ResultExt;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{ErrorKind, Result};
use crate::href;
use crate::package::{Package, decode, parse_xml};

pub const CONTAINER_PATH: &str = "META-INF/container.xml";
const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";
/// Upper bound for pre-allocating an entry's buffer from its declared size.
const MAX_PREALLOCATION_BYTES: u64 = 16 * 1024 * 1024;

/// An opened EPUB container. Entries are decompressed only when asked for.
pub struct Archive {
    zip: ZipArchive<Cursor<Vec<u8>>>,
}
impl Archive {
    /// Opens archive bytes and parses the package document they contain.
    ///
    /// The package is located through `META-INF/container.xml`. If that file
    /// is missing, names no rootfile, or names one that isn't in the
    /// archive, the first `.opf` entry is used instead.
    ///
    /// # Errors
    ///
    /// - [`NotAnArchive`](ErrorKind::NotAnArchive) if the bytes aren't a zip.
    /// - [`ManifestMissing`](ErrorKind::ManifestMissing) if no package
    ///   document can be found.
    /// - [`ManifestMalformed`](ErrorKind::ManifestMalformed) if the container
    ///   or package document is not usable XML.
    pub fn open(bytes: Vec<u8>) -> Result<(Self, Package)> {
        let zip = ZipArchive::new(Cursor::new(bytes)).map_err(|e| ErrorKind::NotAnArchive(e.to_string()))?;
        let mut archive = Self { zip };
        let package_path = archive.locate_package()?;
        let package_bytes = archive.read(&package_path).or_raise(|| ErrorKind::ManifestMalformed(package_path.clone()))?;
        let package = Package::parse(&package_path, &package_bytes)?;
        Ok((archive, package))
    }

    /// Whether an entry with this exact name exists.
    pub fn contains(&self, path: &str) -> bool {
        self.zip.index_for_name(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.zip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zip.is_empty()
    }

    /// Reads and decompresses one entry.
    ///
    /// # Errors
    ///
    /// - [`ContentDocumentMissing`](ErrorKind::ContentDocumentMissing) if there
    ///   is no such entry.
    /// - [`CorruptEntry`](ErrorKind::CorruptEntry) if the entry can't be
    ///   decompressed or fails its checksum.
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut file = match self.zip.by_name(path) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => exn::bail!(ErrorKind::ContentDocumentMissing(path.to_string())),
            Err(e) => return Err(e).or_raise(|| ErrorKind::CorruptEntry(path.to_string())),
        };
        let capacity = file.size().min(MAX_PREALLOCATION_BYTES);
        let mut buffer = Vec::with_capacity(usize::try_from(capacity).unwrap_or_default());
        file.read_to_end(&mut buffer).or_raise(|| ErrorKind::CorruptEntry(path.to_string()))?;
        Ok(buffer)
    }

    fn locate_package(&mut self) -> Result<String> {
        if let Some(path) = self.package_from_container()?
            && self.contains(&path)
        {
            return Ok(path);
        }
        let fallback = self.zip.file_names().find(|name| name.to_ascii_lowercase().ends_with(".opf")).map(str::to_string);
        match fallback {
            Some(path) => {
                tracing::debug!(package = %path, "Falling back to first .opf entry in archive");
                Ok(path)
            },
            None => exn::bail!(ErrorKind::ManifestMissing),
        }
    }

    /// The rootfile named by the container, if the container exists and
    /// names one.
    fn package_from_container(&mut self) -> Result<Option<String>> {
        let bytes = match self.read(CONTAINER_PATH) {
            Ok(bytes) => bytes,
            Err(err) if matches!(&*err, ErrorKind::ContentDocumentMissing(_)) => return Ok(None),
            Err(err) => return Err(err.raise(ErrorKind::ManifestMalformed(CONTAINER_PATH.to_string()))),
        };
        let text = decode(&bytes);
        let document = parse_xml(&text).or_raise(|| ErrorKind::ManifestMalformed(CONTAINER_PATH.to_string()))?;
        let rootfiles: Vec<_> = document
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "rootfile")
            .filter_map(|n| Some((n.attribute("full-path")?, n.attribute("media-type"))))
            .collect();
        let preferred = rootfiles
            .iter()
            .find(|(_, media_type)| media_type.is_some_and(|m| m.trim() == PACKAGE_MEDIA_TYPE))
            .or_else(|| rootfiles.first());
        // `full-path` is relative to the container root, not to META-INF.
        Ok(preferred.and_then(|(full_path, _)| href::resolve("", full_path)).map(|href| href.path))
    }
}
