//! OPF package parser using quick-xml SAX-style parsing
//!
//! Reads `META-INF/container.xml` to find the package document, then
//! collects the manifest, spine and Dublin Core metadata from the OPF.
//! Also hosts the archive path helpers used to resolve hrefs.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::EpubError;
use crate::xml::{decode_name, get_attribute, local_name, resolve_entity};
use crate::zip::{extract_with_limits, ArchiveIndex, ZipLimits};

/// Fixed location of the container document
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Media type of EPUB2 NCX navigation documents
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// A single item in the EPUB manifest (id -> href mapping)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestItem {
    /// Resource identifier
    pub id: String,
    /// Path relative to the OPF
    pub href: String,
    /// MIME type
    pub media_type: String,
    /// Optional properties (e.g. "cover-image", "nav")
    pub properties: Option<String>,
}

impl ManifestItem {
    /// Whether the whitespace-separated `properties` list contains `prop`.
    pub fn has_property(&self, prop: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|p| p.split_whitespace().any(|p| p == prop))
    }

    /// Whether this item is an (X)HTML/XML content document.
    pub fn is_markup(&self) -> bool {
        let media_type = self.media_type.to_ascii_lowercase();
        media_type.contains("html") || media_type.contains("xml")
    }
}

/// Manifest in document order, indexed by id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    items: Vec<ManifestItem>,
    by_id: HashMap<String, usize>,
}

impl Manifest {
    /// Add an item; a repeated id keeps the first declaration.
    pub fn push(&mut self, item: ManifestItem) {
        if self.by_id.contains_key(&item.id) {
            log::warn!("[OPF] Duplicate manifest id '{}' ignored", item.id);
            return;
        }
        self.by_id.insert(item.id.clone(), self.items.len());
        self.items.push(item);
    }

    /// Get manifest item by id
    pub fn get(&self, id: &str) -> Option<&ManifestItem> {
        self.by_id.get(id).and_then(|&idx| self.items.get(idx))
    }

    /// Iterate items in document order
    pub fn iter(&self) -> impl Iterator<Item = &ManifestItem> {
        self.items.iter()
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the manifest is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Find the item whose resolved href equals `path`.
    pub fn find_by_path(&self, base_path: &str, path: &str) -> Option<&ManifestItem> {
        self.items
            .iter()
            .find(|item| resolve_path(base_path, &item.href) == path)
    }

    /// The EPUB3 navigation document.
    pub fn nav_item(&self) -> Option<&ManifestItem> {
        self.items.iter().find(|item| item.has_property("nav"))
    }
}

/// One `<itemref>` of the spine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpineItem {
    /// Manifest id
    pub idref: String,
    /// `linear="no"` marks auxiliary content
    pub linear: bool,
}

/// Dublin Core metadata
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    /// Book title (dc:title)
    pub title: Option<String>,
    /// Author (first dc:creator)
    pub creator: Option<String>,
    /// Language code (dc:language)
    pub language: Option<String>,
    /// Unique identifier (dc:identifier)
    pub identifier: Option<String>,
}

/// Parsed package document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Package {
    /// Archive path of the OPF
    pub opf_path: String,
    /// Directory containing the OPF ("" at archive root)
    pub base_path: String,
    /// All declared resources
    pub manifest: Manifest,
    /// Reading order
    pub spine: Vec<SpineItem>,
    /// Spine `toc` attribute (NCX manifest id)
    pub toc_id: Option<String>,
    /// Dublin Core metadata
    pub metadata: PackageMetadata,
}

impl Package {
    /// Spine idrefs in reading order.
    pub fn spine_order(&self) -> Vec<&str> {
        self.spine.iter().map(|s| s.idref.as_str()).collect()
    }

    /// Archive path of a manifest item.
    pub fn item_path(&self, item: &ManifestItem) -> String {
        resolve_path(&self.base_path, &item.href)
    }

    /// The EPUB2 NCX item: spine `toc` id first, then by media type.
    pub fn ncx_item(&self) -> Option<&ManifestItem> {
        self.toc_id
            .as_deref()
            .and_then(|id| self.manifest.get(id))
            .or_else(|| {
                self.manifest
                    .iter()
                    .find(|item| item.media_type == NCX_MEDIA_TYPE)
            })
    }
}

/// Locate and parse the package document of an indexed archive.
pub fn parse_package(data: &[u8], index: &ArchiveIndex) -> Result<Package, EpubError> {
    parse_package_with_limits(data, index, &ZipLimits::default())
}

/// [`parse_package`] with explicit ZIP limits.
pub fn parse_package_with_limits(
    data: &[u8],
    index: &ArchiveIndex,
    limits: &ZipLimits,
) -> Result<Package, EpubError> {
    let container_meta = index.get(CONTAINER_PATH).ok_or_else(|| {
        EpubError::MalformedPackage(format!("{} is missing from the archive", CONTAINER_PATH))
    })?;
    let container = extract_with_limits(data, container_meta, limits)?;
    let opf_path = parse_container_xml(&container)?;

    let opf_meta = index.get(&opf_path).ok_or_else(|| {
        EpubError::MalformedPackage(format!("package document '{}' is missing", opf_path))
    })?;
    let opf = extract_with_limits(data, opf_meta, limits)?;
    let package = parse_opf(&opf, &opf_path)?;

    log::debug!(
        "[OPF] {}: {} manifest items, {} spine items",
        package.opf_path,
        package.manifest.len(),
        package.spine.len()
    );
    Ok(package)
}

/// Parse container.xml to find the OPF package file path
///
/// Returns the full-path attribute of the first rootfile element
pub fn parse_container_xml(content: &[u8]) -> Result<String, EpubError> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = decode_name(e.name().as_ref(), reader.decoder())?;
                if local_name(&name) == "rootfile" {
                    if let Some(path) = get_attribute(&e, reader.decoder(), "full-path")
                        .filter(|p| !p.trim().is_empty())
                    {
                        return Ok(normalize_path(path.trim()));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::MalformedPackage(format!(
                    "container.xml: XML parse error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Err(EpubError::MalformedPackage(
        "No rootfile full-path in container.xml".into(),
    ))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OpfSection {
    Other,
    Metadata,
    Manifest,
    Spine,
}

/// Parse an OPF document located at `opf_path`.
pub fn parse_opf(content: &[u8], opf_path: &str) -> Result<Package, EpubError> {
    let mut reader = Reader::from_reader(content);
    // text is trimmed per element; entity refs split it into several events
    reader.config_mut().trim_text(false);

    let mut package = Package {
        opf_path: opf_path.to_string(),
        base_path: parent_dir(opf_path).to_string(),
        ..Package::default()
    };

    let mut buf = Vec::new();
    let mut section = OpfSection::Other;
    let mut saw_package = false;
    // Dublin Core element being read and its accumulated text
    let mut current_dc: Option<String> = None;
    let mut text = String::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            EpubError::MalformedPackage(format!("{}: XML parse error: {}", opf_path, e))
        })?;
        match event {
            Event::Start(e) => {
                let name = decode_name(e.name().as_ref(), reader.decoder())?;
                match local_name(&name) {
                    "package" => saw_package = true,
                    "metadata" => section = OpfSection::Metadata,
                    "manifest" => section = OpfSection::Manifest,
                    "spine" => {
                        section = OpfSection::Spine;
                        package.toc_id = get_attribute(&e, reader.decoder(), "toc");
                    }
                    _ => handle_opf_element(&e, &name, section, &mut package, &reader)?,
                }
                if section == OpfSection::Metadata && name.starts_with("dc:") {
                    current_dc = Some(local_name(&name).to_string());
                    text.clear();
                }
            }
            Event::Empty(e) => {
                let name = decode_name(e.name().as_ref(), reader.decoder())?;
                if local_name(&name) == "spine" {
                    package.toc_id = get_attribute(&e, reader.decoder(), "toc");
                } else {
                    handle_opf_element(&e, &name, section, &mut package, &reader)?;
                }
            }
            Event::Text(e) if current_dc.is_some() => {
                let decoded = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|e| EpubError::Markup(format!("Decode error: {:?}", e)))?;
                text.push_str(&decoded);
            }
            Event::GeneralRef(e) if current_dc.is_some() => {
                let name = e
                    .decode()
                    .map_err(|e| EpubError::Markup(format!("Decode error: {:?}", e)))?;
                text.push_str(&resolve_entity(&name));
            }
            Event::End(e) => {
                let name = decode_name(e.name().as_ref(), reader.decoder())?;
                match local_name(&name) {
                    "metadata" | "manifest" | "spine" => section = OpfSection::Other,
                    local => {
                        if current_dc.as_deref() == Some(local) {
                            store_dc(&mut package.metadata, local, text.trim());
                            current_dc = None;
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_package {
        return Err(EpubError::MalformedPackage(format!(
            "{}: no <package> element",
            opf_path
        )));
    }
    Ok(package)
}

fn handle_opf_element(
    e: &BytesStart<'_>,
    name: &str,
    section: OpfSection,
    package: &mut Package,
    reader: &Reader<&[u8]>,
) -> Result<(), EpubError> {
    let decoder = reader.decoder();
    match (section, local_name(name)) {
        (OpfSection::Manifest, "item") => {
            let id = get_attribute(e, decoder, "id");
            let href = get_attribute(e, decoder, "href");
            let media_type = get_attribute(e, decoder, "media-type");
            match (id, href, media_type) {
                (Some(id), Some(href), Some(media_type)) => package.manifest.push(ManifestItem {
                    id,
                    href,
                    media_type,
                    properties: get_attribute(e, decoder, "properties"),
                }),
                _ => log::debug!("[OPF] Skipping incomplete manifest item"),
            }
        }
        (OpfSection::Spine, "itemref") => {
            if let Some(idref) = get_attribute(e, decoder, "idref") {
                let linear = get_attribute(e, decoder, "linear").as_deref() != Some("no");
                package.spine.push(SpineItem { idref, linear });
            }
        }
        _ => {}
    }
    Ok(())
}

fn store_dc(metadata: &mut PackageMetadata, local: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let slot = match local {
        "title" => &mut metadata.title,
        "creator" => &mut metadata.creator,
        "language" => &mut metadata.language,
        "identifier" => &mut metadata.identifier,
        _ => return,
    };
    // first occurrence wins
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

/// Directory part of an archive path ("" for root-level files).
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Split `href` into path and optional non-empty fragment.
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, fragment)) if !fragment.is_empty() => (path, Some(fragment)),
        Some((path, _)) => (path, None),
        None => (href, None),
    }
}

/// Whether `href` points outside the archive.
pub fn is_external(href: &str) -> bool {
    let lower = href.trim_start().to_ascii_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("data:")
        || lower.starts_with("blob:")
        || lower.starts_with("mailto:")
}

/// Resolve `href` relative to directory `base_dir` into an archive path.
///
/// Fragment and query are dropped, `.` and `..` segments are normalized,
/// absolute (`/`-prefixed) hrefs are taken from the archive root, and
/// external URLs are returned unchanged.
pub fn resolve_path(base_dir: &str, href: &str) -> String {
    if is_external(href) {
        return href.to_string();
    }
    let href = href.split(['#', '?']).next().unwrap_or(href);
    if let Some(absolute) = href.strip_prefix('/') {
        return normalize_path(absolute);
    }
    if base_dir.is_empty() {
        normalize_path(href)
    } else {
        normalize_path(&format!("{}/{}", base_dir, href))
    }
}

/// Collapse `.`, `..` and empty segments.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    parts.join("/")
}
