//! Navigation resolution (table of contents)
//!
//! Reads the EPUB 3.x XHTML navigation document (`<nav epub:type="toc">`),
//! falls back to the EPUB 2.0 NCX (`toc.ncx`), and finally to the TOC
//! derived from section headings. Every entry is mapped to an index into
//! the assembled section sequence; entries that match no section are
//! dropped.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::assemble::{heading_toc, slugify, Section, TocItem};
use crate::book::{LoadOptions, ValidationMode};
use crate::dom::{self, Element};
use crate::error::EpubError;
use crate::package::{parent_dir, resolve_path, split_fragment, ManifestItem, Package};
use crate::xml::{decode_name, get_attribute, local_name, resolve_entity};
use crate::zip::{extract_with_limits, ArchiveIndex};

/// One link read from a navigation document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavEntry {
    /// Display label
    pub label: String,
    /// Link target as written (relative to the navigation document)
    pub href: String,
    /// Nesting depth, 1-based
    pub level: u8,
}

/// Where the final TOC came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TocSource {
    /// EPUB 3.x navigation document
    NavDocument,
    /// EPUB 2.0 NCX
    Ncx,
    /// Section headings
    Headings,
}

/// TOC mapped onto the section sequence
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedToc {
    /// Entries sorted by section index
    pub items: Vec<TocItem>,
    /// Origin of the entries
    pub source: TocSource,
}

/// Parse a navigation document (as HTML) into flat entries.
///
/// Prefers `<nav epub:type="toc">` or `<nav type="toc">`, then the first
/// `<nav>`. Anchors need an `href` and non-empty text; the level is the
/// number of enclosing `<li>` elements. A document without any `<nav>`
/// is a `Markup` error.
pub fn parse_nav_document(markup: &str) -> Result<Vec<NavEntry>, EpubError> {
    let doc = dom::parse(markup);
    let is_toc_nav = |el: &Element| {
        el.is("nav")
            && ["epub:type", "type"].iter().any(|key| {
                el.attr(key)
                    .is_some_and(|v| v.split_whitespace().any(|t| t == "toc"))
            })
    };
    let nav = doc
        .root
        .find(&is_toc_nav)
        .or_else(|| doc.root.find(&|el| el.is("nav")));

    let nav = nav.ok_or_else(|| EpubError::Markup("no <nav> element".into()))?;
    let mut entries = Vec::new();
    collect_anchors(nav, 0, &mut entries);
    Ok(entries)
}

fn collect_anchors(el: &Element, li_depth: u8, out: &mut Vec<NavEntry>) {
    for child in el.children.iter().filter_map(|n| match n {
        dom::Node::Element(el) => Some(el),
        dom::Node::Text(_) => None,
    }) {
        if child.is("a") {
            let label = child.plain_text();
            if let Some(href) = child.attr("href").filter(|h| !h.trim().is_empty()) {
                if !label.is_empty() {
                    out.push(NavEntry {
                        label,
                        href: href.trim().to_string(),
                        level: li_depth.max(1),
                    });
                }
            }
            continue;
        }
        let depth = if child.is("li") {
            li_depth.saturating_add(1)
        } else {
            li_depth
        };
        collect_anchors(child, depth, out);
    }
}

/// Parse an EPUB 2.0 NCX into flat entries; the level is the `navPoint`
/// nesting depth.
pub fn parse_ncx(content: &[u8]) -> Result<Vec<NavEntry>, EpubError> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut entries = Vec::new();
    // one slot per open navPoint: index into `entries`
    let mut open_points: Vec<usize> = Vec::new();
    let mut in_nav_map = false;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => {
                let name = decode_name(e.name().as_ref(), reader.decoder())?;
                match local_name(&name) {
                    "navMap" => in_nav_map = true,
                    "navPoint" if in_nav_map => {
                        open_points.push(entries.len());
                        entries.push(NavEntry {
                            label: String::new(),
                            href: String::new(),
                            level: open_points.len().min(u8::MAX as usize) as u8,
                        });
                    }
                    "text" => in_text = !open_points.is_empty(),
                    "content" => {
                        if let (Some(&idx), Some(src)) = (
                            open_points.last(),
                            get_attribute(&e, reader.decoder(), "src"),
                        ) {
                            entries[idx].href = src.trim().to_string();
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) if in_text => {
                let text = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|e| EpubError::Markup(format!("Decode error: {:?}", e)))?;
                if let Some(&idx) = open_points.last() {
                    entries[idx].label.push_str(&text);
                }
            }
            Event::GeneralRef(e) if in_text => {
                let name = e
                    .decode()
                    .map_err(|e| EpubError::Markup(format!("Decode error: {:?}", e)))?;
                if let Some(&idx) = open_points.last() {
                    entries[idx].label.push_str(&resolve_entity(&name));
                }
            }
            Event::End(e) => {
                let name = decode_name(e.name().as_ref(), reader.decoder())?;
                match local_name(&name) {
                    "navMap" => in_nav_map = false,
                    "navPoint" => {
                        open_points.pop();
                    }
                    "text" => in_text = false,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    for entry in &mut entries {
        entry.label = dom::normalize_whitespace(&entry.label);
    }
    entries.retain(|e| !e.label.is_empty() && !e.href.is_empty());
    Ok(entries)
}

/// Map navigation entries onto sections.
///
/// `nav_path` is the archive path of the navigation document and
/// `base_path` the OPF directory; link paths are resolved against the
/// former first. Unmatched entries are dropped; survivors are stably
/// sorted by section index.
pub fn resolve_entries(
    entries: &[NavEntry],
    nav_path: &str,
    base_path: &str,
    sections: &[Section],
) -> Vec<TocItem> {
    let nav_dir = parent_dir(nav_path);
    let mut items: Vec<TocItem> = entries
        .iter()
        .filter_map(|entry| {
            let (path, fragment) = split_fragment(&entry.href);
            let doc_path = if path.is_empty() {
                None
            } else {
                let candidates = [resolve_path(nav_dir, path), resolve_path(base_path, path)];
                let matched = candidates
                    .iter()
                    .find(|c| sections.iter().any(|s| &s.source == *c))
                    .cloned();
                Some(matched.unwrap_or_else(|| candidates[0].clone()))
            };
            let section_index = match_section(sections, doc_path.as_deref(), fragment, &entry.label)?;
            let section = &sections[section_index];
            let id = match fragment {
                Some(frag) if section.anchors.iter().any(|a| a == frag) => frag.to_string(),
                _ => section.id.clone(),
            };
            Some(TocItem {
                id,
                title: entry.label.clone(),
                level: entry.level,
                href: Some(entry.href.clone()),
                section_index,
            })
        })
        .collect();
    items.sort_by_key(|item| item.section_index);
    items
}

fn match_section(
    sections: &[Section],
    doc_path: Option<&str>,
    fragment: Option<&str>,
    label: &str,
) -> Option<usize> {
    let in_doc = |s: &Section| doc_path.map_or(true, |p| s.source == p);
    let by_id = |id: &str| {
        sections
            .iter()
            .position(|s| in_doc(s) && (s.id == id || s.anchors.iter().any(|a| a == id)))
            .or_else(|| sections.iter().position(|s| s.id == id))
    };

    if let Some(fragment) = fragment {
        return by_id(fragment);
    }
    let slug = slugify(label);
    if !slug.is_empty() {
        if let Some(idx) = by_id(&slug) {
            return Some(idx);
        }
    }
    let doc_path = doc_path?;
    sections.iter().position(|s| s.source == doc_path)
}

/// Build the book TOC: navigation document, then NCX, then headings.
pub fn resolve_nav(
    data: &[u8],
    index: &ArchiveIndex,
    package: &Package,
    sections: &[Section],
    options: &LoadOptions,
) -> Result<ResolvedToc, EpubError> {
    if let Some(item) = package.manifest.nav_item() {
        if let Some((path, bytes)) = read_nav_item(data, index, package, item, options)? {
            match parse_nav_document(&dom::decode_text(&bytes)) {
                Ok(entries) => {
                    let items = resolve_entries(&entries, &path, &package.base_path, sections);
                    log::debug!(
                        "[NAV] {}: {} of {} entries resolved",
                        path,
                        items.len(),
                        entries.len()
                    );
                    if !items.is_empty() {
                        return Ok(ResolvedToc {
                            items,
                            source: TocSource::NavDocument,
                        });
                    }
                }
                Err(err) => log::warn!("[NAV] Navigation document '{}' unusable: {}", path, err),
            }
        }
    }

    if let Some(item) = package.ncx_item() {
        if let Some((path, bytes)) = read_nav_item(data, index, package, item, options)? {
            match parse_ncx(&bytes) {
                Ok(entries) => {
                    let items = resolve_entries(&entries, &path, &package.base_path, sections);
                    if !items.is_empty() {
                        return Ok(ResolvedToc {
                            items,
                            source: TocSource::Ncx,
                        });
                    }
                }
                Err(err) => log::warn!("[NAV] NCX '{}' unusable: {}", path, err),
            }
        }
    }

    Ok(ResolvedToc {
        items: heading_toc(sections),
        source: TocSource::Headings,
    })
}

fn read_nav_item(
    data: &[u8],
    index: &ArchiveIndex,
    package: &Package,
    item: &ManifestItem,
    options: &LoadOptions,
) -> Result<Option<(String, Vec<u8>)>, EpubError> {
    let path = package.item_path(item);
    let Some(meta) = index.get(&path) else {
        let err = EpubError::ResourceNotFound { path };
        if options.validation_mode == ValidationMode::Strict {
            return Err(err);
        }
        log::warn!("[NAV] {}; falling back", err);
        return Ok(None);
    };
    let bytes = extract_with_limits(data, meta, &options.zip_limits)?;
    Ok(Some((path, bytes)))
}
