//! Content assembly: spine documents to sanitized, heading-bounded sections.
//!
//! Each spine document goes through the same steps, in order:
//!
//! 1. extract, decode and parse the markup ([`DocumentContext::prepare`]),
//!    noting every stylesheet and embedded resource it references;
//! 2. extract the referenced archive members;
//! 3. inline stylesheets, register resources and rewrite their URLs
//!    ([`DocumentContext::finish`]);
//! 4. sanitize the body once;
//! 5. split at `h1`..`h6` into [`Section`]s ([`SectionSplitter`]).
//!
//! Step 2 is the only one that touches archive bytes after preparation, so
//! the async loader can run it concurrently without changing the result.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use crate::book::{LoadOptions, ValidationMode};
use crate::dom::{self, Document, Element, Node};
use crate::error::EpubError;
use crate::package::{is_external, parent_dir, resolve_path, Package};
use crate::resources::{guess_mime_type, ResourceHandles};
use crate::sanitize::sanitize_nodes;
use crate::zip::{extract_with_limits, ArchiveIndex};

/// Resource-bearing elements and the attributes holding their URL.
const RESOURCE_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("img", &["src"]),
    ("image", &["href", "xlink:href"]),
    ("audio", &["src"]),
    ("video", &["src", "poster"]),
    ("source", &["src"]),
    ("track", &["src"]),
];

/// A heading-bounded region of a content document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    /// Book-unique id, also set on the heading element
    pub id: String,
    /// Heading text, or a generated title
    pub title: String,
    /// Heading depth 1..=6 (1 for headless chapters)
    pub level: u8,
    /// Sanitized markup fragment
    pub html: String,
    /// Text without markup, whitespace collapsed
    pub plain_text: String,
    /// Archive path of the content document
    pub source: String,
    /// Element ids inside the section, plus the heading's original id when
    /// it had to be renamed
    pub anchors: Vec<String>,
}

/// Table of contents entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TocItem {
    /// Target section id
    pub id: String,
    /// Display title
    pub title: String,
    /// Nesting depth, 1-based
    pub level: u8,
    /// Original link target, if any
    pub href: Option<String>,
    /// Index into the section sequence
    pub section_index: usize,
}

/// Sections plus their heading-derived TOC
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Assembly {
    /// Linear reading sequence
    pub sections: Vec<Section>,
    /// One entry per section
    pub toc: Vec<TocItem>,
}

/// Lowercase, keep `[a-z0-9]`, CJK ideographs, whitespace and `-`, then
/// turn whitespace runs into `-`.
pub fn slugify(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| {
            c.is_ascii_lowercase()
                || c.is_ascii_digit()
                || ('\u{4e00}'..='\u{9fa5}').contains(c)
                || c.is_whitespace()
                || *c == '-'
        })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join("-")
}

/// Heading-derived TOC: one entry per section.
pub fn heading_toc(sections: &[Section]) -> Vec<TocItem> {
    sections
        .iter()
        .enumerate()
        .map(|(section_index, section)| TocItem {
            id: section.id.clone(),
            title: section.title.clone(),
            level: section.level,
            href: Some(format!("{}#{}", section.source, section.id)),
            section_index,
        })
        .collect()
}

/// Assemble every spine document of a package, sequentially.
pub fn assemble(
    data: &[u8],
    index: &ArchiveIndex,
    package: &Package,
    handles: &mut ResourceHandles,
    options: &LoadOptions,
) -> Result<Assembly, EpubError> {
    let ctx = DocumentContext::new(data, index, package, options);
    let mut splitter = SectionSplitter::new();

    for spine_index in 0..package.spine.len() {
        let Some(job) = ctx.prepare(spine_index)? else {
            continue;
        };
        let mut fetched = HashMap::new();
        for path in job.fetch_list() {
            if handles.url_for(&path).is_none() {
                fetched.insert(path.clone(), ctx.extract(&path)?);
            }
        }
        ctx.finish(job, fetched, handles, &mut splitter);
    }

    Ok(splitter.into_assembly())
}

/// A parsed spine document waiting for its referenced members
#[derive(Debug)]
pub(crate) struct DocumentJob {
    pub(crate) spine_index: usize,
    pub(crate) source: String,
    dir: String,
    doc: Document,
    stylesheets: Vec<String>,
    resources: Vec<String>,
}

impl DocumentJob {
    /// Unique archive paths to extract before [`DocumentContext::finish`].
    pub(crate) fn fetch_list(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.stylesheets
            .iter()
            .chain(self.resources.iter())
            .filter(|p| seen.insert(p.as_str()))
            .cloned()
            .collect()
    }
}

/// Shared read-only state for assembling one book
pub(crate) struct DocumentContext<'a> {
    data: &'a [u8],
    index: &'a ArchiveIndex,
    package: &'a Package,
    options: &'a LoadOptions,
}

impl<'a> DocumentContext<'a> {
    pub(crate) fn new(
        data: &'a [u8],
        index: &'a ArchiveIndex,
        package: &'a Package,
        options: &'a LoadOptions,
    ) -> Self {
        Self {
            data,
            index,
            package,
            options,
        }
    }

    /// Swallow a soft failure in lenient mode.
    fn soft_fail(&self, err: EpubError) -> Result<(), EpubError> {
        if err.is_soft() && self.options.validation_mode == ValidationMode::Lenient {
            log::warn!("[ASM] {}; skipping", err);
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Extract one member by archive path.
    pub(crate) fn extract(&self, path: &str) -> Result<Vec<u8>, EpubError> {
        let meta = self
            .index
            .get(path)
            .ok_or_else(|| EpubError::ResourceNotFound {
                path: path.to_string(),
            })?;
        extract_with_limits(self.data, meta, &self.options.zip_limits)
    }

    /// Archive name for a local reference, trying the document's own
    /// directory first and the OPF directory second.
    fn locate(&self, doc_dir: &str, href: &str) -> Option<String> {
        [doc_dir, self.package.base_path.as_str()]
            .iter()
            .map(|dir| resolve_path(dir, href))
            .find_map(|path| self.index.get(&path).map(|meta| meta.file_name.clone()))
    }

    /// Resolve a reference, reporting missing members as soft failures.
    ///
    /// `Ok(None)` means the reference stays untouched (external, fragment,
    /// or missing in lenient mode).
    fn resolve_ref(&self, doc_dir: &str, href: &str) -> Result<Option<String>, EpubError> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || is_external(href) {
            return Ok(None);
        }
        match self.locate(doc_dir, href) {
            Some(path) => Ok(Some(path)),
            None => {
                self.soft_fail(EpubError::ResourceNotFound {
                    path: resolve_path(doc_dir, href),
                })?;
                Ok(None)
            }
        }
    }

    fn media_type_of(&self, path: &str) -> String {
        self.package
            .manifest
            .find_by_path(&self.package.base_path, path)
            .map(|item| item.media_type.clone())
            .unwrap_or_else(|| guess_mime_type(path).to_string())
    }

    /// Extract and parse the spine document at `spine_index`.
    ///
    /// `Ok(None)` when the item is skipped (unknown id, non-markup media
    /// type, or a missing member in lenient mode).
    pub(crate) fn prepare(&self, spine_index: usize) -> Result<Option<DocumentJob>, EpubError> {
        let Some(spine_item) = self.package.spine.get(spine_index) else {
            return Ok(None);
        };
        let Some(item) = self.package.manifest.get(&spine_item.idref) else {
            self.soft_fail(EpubError::ResourceNotFound {
                path: format!("manifest id '{}'", spine_item.idref),
            })?;
            return Ok(None);
        };
        if !item.is_markup() {
            log::debug!(
                "[ASM] Skipping spine item '{}' ({})",
                item.id,
                item.media_type
            );
            return Ok(None);
        }

        let path = self.package.item_path(item);
        let bytes = match self.extract(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.is_soft() => {
                self.soft_fail(err)?;
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let doc = dom::parse(&dom::decode_text(&bytes));
        let dir = parent_dir(&path).to_string();

        let mut stylesheets = Vec::new();
        for link in doc.root.find_all(&is_stylesheet_link) {
            if let Some(href) = link.attr("href") {
                if let Some(css_path) = self.resolve_ref(&dir, href)? {
                    stylesheets.push(css_path);
                }
            }
        }

        let mut resources = Vec::new();
        for el in doc.root.find_all(&|el| resource_attributes(el).is_some()) {
            for attr in resource_attributes(el).unwrap_or(&[]) {
                if let Some(href) = el.attr(attr) {
                    if let Some(res_path) = self.resolve_ref(&dir, href)? {
                        resources.push(res_path);
                    }
                }
            }
        }

        Ok(Some(DocumentJob {
            spine_index,
            source: path,
            dir,
            doc,
            stylesheets,
            resources,
        }))
    }

    /// Apply fetched members to a prepared document, then sanitize and split.
    ///
    /// Resources already registered in `handles` (by an earlier document)
    /// are reused instead of registered again.
    pub(crate) fn finish(
        &self,
        job: DocumentJob,
        mut fetched: HashMap<String, Vec<u8>>,
        handles: &mut ResourceHandles,
        splitter: &mut SectionSplitter,
    ) {
        let DocumentJob {
            spine_index,
            source,
            dir,
            mut doc,
            stylesheets: _,
            resources,
        } = job;

        self.inline_stylesheets(&mut doc.root.children, &dir, &fetched);

        let mut urls: HashMap<String, String> = HashMap::new();
        for path in resources {
            if urls.contains_key(&path) {
                continue;
            }
            if let Some(url) = handles.url_for(&path) {
                urls.insert(path, url.to_string());
            } else if let Some(bytes) = fetched.remove(&path) {
                let media_type = self.media_type_of(&path);
                let url = handles.register(&path, &media_type, bytes).url.clone();
                urls.insert(path, url);
            }
        }
        doc.root.walk_mut(&mut |el| {
            let Some(attrs) = resource_attributes(el) else {
                return;
            };
            for attr in attrs {
                let target = el
                    .attr(attr)
                    .and_then(|href| self.locate(&dir, href.trim()))
                    .and_then(|path| urls.get(&path));
                if let Some(url) = target {
                    let url = url.clone();
                    el.set_attr(attr, url);
                }
            }
        });

        let mut nodes = doc.into_body_nodes();
        sanitize_nodes(&mut nodes, &self.options.sanitize);
        splitter.split_document(nodes, &source, spine_index);
    }

    /// Replace `<link rel="stylesheet">` with `<style>`; drop unresolved links.
    fn inline_stylesheets(
        &self,
        nodes: &mut Vec<Node>,
        dir: &str,
        fetched: &HashMap<String, Vec<u8>>,
    ) {
        let input = std::mem::take(nodes);
        for node in input {
            match node {
                Node::Element(el) if is_stylesheet_link(&el) => {
                    let css = el
                        .attr("href")
                        .and_then(|href| self.locate(dir, href.trim()))
                        .and_then(|path| fetched.get(&path));
                    if let Some(bytes) = css {
                        let mut style = Element::new("style");
                        style.push_text(&escape_css_markup(&dom::decode_text(bytes)));
                        nodes.push(Node::Element(style));
                    }
                }
                Node::Element(mut el) => {
                    self.inline_stylesheets(&mut el.children, dir, fetched);
                    nodes.push(Node::Element(el));
                }
                text => nodes.push(text),
            }
        }
    }
}

/// Escape `<` as the CSS escape `\3C ` so inlined text cannot close its
/// `<style>` element.
fn escape_css_markup(css: &str) -> Cow<'_, str> {
    if css.contains('<') {
        Cow::Owned(css.replace('<', "\\3C "))
    } else {
        Cow::Borrowed(css)
    }
}

fn is_stylesheet_link(el: &Element) -> bool {
    el.is("link")
        && el
            .attr("rel")
            .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")))
}

fn resource_attributes(el: &Element) -> Option<&'static [&'static str]> {
    RESOURCE_ATTRIBUTES
        .iter()
        .find(|(name, _)| el.is(name))
        .map(|(_, attrs)| *attrs)
}

/// Splits sanitized documents into sections, keeping ids unique book-wide.
#[derive(Debug, Default)]
pub struct SectionSplitter {
    sections: Vec<Section>,
    used_ids: HashSet<String>,
}

/// Sections of one document under construction
struct Part {
    heading: Option<HeadingInfo>,
    root: Vec<Node>,
    /// Open wrapper copies, mirroring the ancestors of the current position
    open: Vec<Element>,
}

struct HeadingInfo {
    id: String,
    title: String,
    level: u8,
    original_id: Option<String>,
}

impl Part {
    fn new(heading: Option<HeadingInfo>) -> Self {
        Self {
            heading,
            root: Vec::new(),
            open: Vec::new(),
        }
    }

    fn push(&mut self, node: Node) {
        let target = match self.open.last_mut() {
            Some(el) => &mut el.children,
            None => &mut self.root,
        };
        if let Node::Text(text) = &node {
            if let Some(Node::Text(last)) = target.last_mut() {
                last.push_str(text);
                return;
            }
        }
        target.push(node);
    }

    /// Close the innermost open wrapper; empty split copies are pruned.
    fn close_one(&mut self) {
        if let Some(el) = self.open.pop() {
            if !el.children.is_empty() {
                self.push(Node::Element(el));
            }
        }
    }

    fn close_all(&mut self) {
        while !self.open.is_empty() {
            self.close_one();
        }
    }
}

impl SectionSplitter {
    /// Empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sections produced so far.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Finish and produce sections plus the heading-derived TOC.
    pub fn into_assembly(self) -> Assembly {
        let toc = heading_toc(&self.sections);
        Assembly {
            sections: self.sections,
            toc,
        }
    }

    /// Reserve `base`, or `base-2`, `base-3`, ... if already taken.
    fn unique_id(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 2;
        while self.used_ids.contains(&candidate) {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        self.used_ids.insert(candidate.clone());
        candidate
    }

    /// Split one sanitized document.
    ///
    /// Content before the first heading joins the first section. A document
    /// without headings becomes one `chapter-{spine_index}` section.
    pub fn split_document(&mut self, nodes: Vec<Node>, source: &str, spine_index: usize) {
        self.split_with_fallback(
            nodes,
            source,
            &format!("chapter-{}", spine_index),
            &format!("Chapter {}", spine_index + 1),
        );
    }

    /// Split one sanitized document; without headings it becomes a single
    /// section with the given id (made unique) and title.
    pub fn split_with_fallback(
        &mut self,
        nodes: Vec<Node>,
        source: &str,
        fallback_id: &str,
        fallback_title: &str,
    ) {
        let mut parts = vec![Part::new(None)];
        let mut ancestors: Vec<Element> = Vec::new();
        self.walk(nodes, &mut parts, &mut ancestors);
        for part in &mut parts {
            part.close_all();
        }

        let mut parts = parts.into_iter();
        let preamble = parts.next().map(|p| p.root).unwrap_or_default();
        let mut parts: Vec<Part> = parts.collect();

        if parts.is_empty() {
            let id = self.unique_id(fallback_id);
            self.push_section(
                HeadingInfo {
                    id,
                    title: fallback_title.to_string(),
                    level: 1,
                    original_id: None,
                },
                preamble,
                source,
            );
            return;
        }

        if let Some(first) = parts.first_mut() {
            let mut merged = preamble;
            merged.append(&mut first.root);
            first.root = merged;
        }
        for part in parts {
            if let Some(heading) = part.heading {
                self.push_section(heading, part.root, source);
            }
        }
    }

    fn push_section(&mut self, heading: HeadingInfo, nodes: Vec<Node>, source: &str) {
        let mut anchors = Vec::new();
        for node in &nodes {
            if let Node::Element(el) = node {
                if let Some(id) = el.id() {
                    anchors.push(id.to_string());
                }
                el.walk(&mut |child| {
                    if let Some(id) = child.id() {
                        anchors.push(id.to_string());
                    }
                });
            }
        }
        if let Some(original) = heading.original_id {
            if !anchors.contains(&original) {
                anchors.push(original);
            }
        }

        self.sections.push(Section {
            id: heading.id,
            title: heading.title,
            level: heading.level,
            html: dom::to_html(&nodes),
            plain_text: dom::nodes_plain_text(&nodes),
            source: source.to_string(),
            anchors,
        });
    }

    fn walk(&mut self, nodes: Vec<Node>, parts: &mut Vec<Part>, ancestors: &mut Vec<Element>) {
        for node in nodes {
            let el = match node {
                Node::Element(el) => el,
                text => {
                    current(parts).push(text);
                    continue;
                }
            };

            if let Some(level) = el.heading_level() {
                let mut el = el;
                let ordinal = self.sections.len() + parts.len();
                let heading = self.heading_info(&el, level, ordinal);
                el.set_attr("id", heading.id.clone());

                // a wrapper copy that ends up empty is pruned, so its id
                // moves on to the next copy
                let prev = current(parts);
                let mut pruned = vec![false; prev.open.len()];
                let mut deeper_has_content = false;
                for (i, open) in prev.open.iter().enumerate().rev() {
                    deeper_has_content |= !open.children.is_empty();
                    pruned[i] = !deeper_has_content;
                }
                prev.close_all();

                let mut part = Part::new(Some(heading));
                part.open = ancestors
                    .iter()
                    .zip(pruned)
                    .map(|(a, pruned)| {
                        let mut copy = a.shallow_clone();
                        if !pruned {
                            copy.remove_attr("id");
                        }
                        copy
                    })
                    .collect();
                part.push(Node::Element(el));
                parts.push(part);
            } else if el.find(&|d| d.heading_level().is_some()).is_some() {
                let wrapper = el.shallow_clone();
                current(parts).open.push(wrapper.clone());
                ancestors.push(wrapper);
                self.walk(el.children, parts, ancestors);
                ancestors.pop();
                current(parts).close_one();
            } else {
                current(parts).push(Node::Element(el));
            }
        }
    }

    fn heading_info(&mut self, el: &Element, level: u8, ordinal: usize) -> HeadingInfo {
        let text = el.plain_text();
        let title = if text.is_empty() {
            format!("Section {}", ordinal)
        } else {
            text
        };
        let original_id = el.id().map(str::to_string);
        let base = original_id
            .clone()
            .or_else(|| Some(slugify(&title)).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| format!("section-{}", ordinal));
        let id = self.unique_id(&base);
        HeadingInfo {
            original_id: original_id.filter(|orig| *orig != id),
            id,
            title,
            level,
        }
    }
}

fn current(parts: &mut [Part]) -> &mut Part {
    let last = parts.len() - 1;
    &mut parts[last]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::MemoryResourceStore;
    use crate::testutil::{container_xml, opf, simple_epub, xhtml, ZipBuilder};
    use crate::zip::build_index;
    use std::sync::Arc;

    fn split(markup: &str) -> Vec<Section> {
        let mut splitter = SectionSplitter::new();
        let nodes = dom::parse(markup).into_body_nodes();
        splitter.split_document(nodes, "doc.xhtml", 0);
        splitter.into_assembly().sections
    }

    fn assemble_zip(zip: &[u8], options: &LoadOptions) -> Result<(Assembly, ResourceHandles), EpubError> {
        let index = build_index(zip)?;
        let package = crate::package::parse_package(zip, &index)?;
        let mut handles = ResourceHandles::new(Arc::new(MemoryResourceStore::new()));
        let assembly = assemble(zip, &index, &package, &mut handles, options)?;
        Ok((assembly, handles))
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  Hello, World! "), "hello-world");
        assert_eq!(slugify("Chapter 1: The Start"), "chapter-1-the-start");
        assert_eq!(slugify("第一章 开始"), "第一章-开始");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn test_split_at_headings() {
        let sections = split("<h1>A</h1><p>x</p><h2>B</h2><p>y</p>");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "A");
        assert_eq!(sections[0].level, 1);
        assert_eq!(sections[0].id, "a");
        assert_eq!(sections[0].html, "<h1 id=\"a\">A</h1><p>x</p>");
        assert_eq!(sections[0].plain_text, "A x");
        assert_eq!(sections[1].title, "B");
        assert_eq!(sections[1].level, 2);
        assert_eq!(sections[1].html, "<h2 id=\"b\">B</h2><p>y</p>");
    }

    #[test]
    fn test_preamble_joins_first_section() {
        let sections = split("<p>intro</p><h1>A</h1><p>x</p>");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].html, "<p>intro</p><h1 id=\"a\">A</h1><p>x</p>");
    }

    #[test]
    fn test_nested_headings_split_wrappers() {
        let sections = split(
            "<div id=\"w\" class=\"c\"><h1>A</h1><p>x</p><section><h2>B</h2><p>y</p></section><p>z</p></div>",
        );
        assert_eq!(sections.len(), 2);
        assert_eq!(
            sections[0].html,
            "<div id=\"w\" class=\"c\"><h1 id=\"a\">A</h1><p>x</p></div>"
        );
        assert_eq!(
            sections[1].html,
            "<div class=\"c\"><section><h2 id=\"b\">B</h2><p>y</p></section><p>z</p></div>"
        );
        assert!(sections[0].anchors.contains(&"w".to_string()));
    }

    #[test]
    fn test_existing_ids_kept_and_collisions_suffixed() {
        let sections = split("<h1 id=\"intro\">X</h1><h2>Same</h2><h2>Same</h2><h3></h3>");
        let ids: Vec<&str> = sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["intro", "same", "same-2", "section-4"]);
        assert_eq!(sections[3].title, "Section 4");
    }

    #[test]
    fn test_ids_unique_across_documents() {
        let mut splitter = SectionSplitter::new();
        for (i, doc) in ["<h1 id=\"t\">One</h1>", "<h1 id=\"t\">Two</h1>"].iter().enumerate() {
            let nodes = dom::parse(doc).into_body_nodes();
            splitter.split_document(nodes, &format!("d{}.xhtml", i), i);
        }
        let assembly = splitter.into_assembly();
        assert_eq!(assembly.sections[0].id, "t");
        assert_eq!(assembly.sections[1].id, "t-2");
        assert!(assembly.sections[1].anchors.contains(&"t".to_string()));
        assert_eq!(assembly.sections[1].html, "<h1 id=\"t-2\">Two</h1>");
    }

    #[test]
    fn test_headless_document_single_section() {
        let mut splitter = SectionSplitter::new();
        let nodes = dom::parse("<p>just text</p>").into_body_nodes();
        splitter.split_document(nodes, "b.xhtml", 4);
        let sections = splitter.into_assembly().sections;
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].id, "chapter-4");
        assert_eq!(sections[0].title, "Chapter 5");
        assert_eq!(sections[0].level, 1);
        assert_eq!(sections[0].plain_text, "just text");
    }

    #[test]
    fn test_n_headings_n_sections() {
        let body = "<h1>One</h1><p>a <em>b</em></p><h3>Two</h3><div><h2>Three</h2><p>c</p></div>\
                    <h6>Four</h6><h4>Five</h4>";
        let sections = split(body);
        assert_eq!(sections.len(), 5);
        for section in &sections {
            assert!(!section.plain_text.contains('<'));
            assert!(!section.plain_text.contains('>'));
        }
        assert_eq!(sections[0].plain_text, "One a b");
        let levels: Vec<u8> = sections.iter().map(|s| s.level).collect();
        assert_eq!(levels, vec![1, 3, 2, 6, 4]);
    }

    #[test]
    fn test_heading_toc_mirrors_sections() {
        let assembly = {
            let mut splitter = SectionSplitter::new();
            let nodes = dom::parse("<h1>A</h1><h2>B</h2>").into_body_nodes();
            splitter.split_document(nodes, "OEBPS/ch1.xhtml", 0);
            splitter.into_assembly()
        };
        assert_eq!(assembly.toc.len(), 2);
        assert_eq!(assembly.toc[1].section_index, 1);
        assert_eq!(assembly.toc[1].level, 2);
        assert_eq!(assembly.toc[0].href.as_deref(), Some("OEBPS/ch1.xhtml#a"));
    }

    #[test]
    fn test_assemble_three_documents_middle_headless() {
        let zip = simple_epub(&[
            ("a.xhtml", "<h1>A1</h1><p>x</p><h2>A2</h2>"),
            ("b.xhtml", "<p>no headings here</p>"),
            ("c.xhtml", "<h1>C1</h1><h1>C2</h1><h2>C3</h2>"),
        ]);
        let (assembly, _) = assemble_zip(&zip, &LoadOptions::default()).unwrap();
        assert_eq!(assembly.sections.len(), 2 + 1 + 3);
        assert_eq!(assembly.sections[2].id, "chapter-1");
        assert_eq!(assembly.sections[2].title, "Chapter 2");
        assert_eq!(assembly.sections[3].title, "C1");
        assert_eq!(assembly.toc[3].section_index, 3);
    }

    fn epub_with_assets(body: &str, extra: &[(&str, &[u8])]) -> Vec<u8> {
        let chapter = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>t</title>
<link rel="stylesheet" type="text/css" href="../styles/main.css"/>
<link rel="stylesheet" href="../styles/missing.css"/>
<style>p {{ margin: 0 }}</style></head>
<body>{}</body></html>"#,
            body
        );
        let mut builder = ZipBuilder::new()
            .stored("mimetype", b"application/epub+zip")
            .deflated("META-INF/container.xml", container_xml("OEBPS/content.opf").as_bytes())
            .deflated(
                "OEBPS/content.opf",
                opf(
                    &[
                        ("c1", "text/ch1.xhtml", "application/xhtml+xml", None),
                        ("css", "styles/main.css", "text/css", None),
                        ("img", "images/pic.png", "image/png", None),
                    ],
                    &["c1"],
                )
                .as_bytes(),
            )
            .deflated("OEBPS/text/ch1.xhtml", chapter.as_bytes())
            .stored("OEBPS/styles/main.css", b"h1 { color: red }");
        for (name, data) in extra {
            builder = builder.stored(name, data);
        }
        builder.build()
    }

    #[test]
    fn test_stylesheets_inlined_and_resources_rewritten() {
        let zip = epub_with_assets(
            "<h1>A</h1><img src=\"../images/pic.png\" alt=\"p\"/><img src=\"../images/pic.png\"/>\
             <img src=\"https://example.com/x.png\"/>",
            &[("OEBPS/images/pic.png", b"\x89PNG")],
        );
        let (assembly, handles) = assemble_zip(&zip, &LoadOptions::default()).unwrap();
        let html = &assembly.sections[0].html;
        assert!(html.contains("<style>h1 { color: red }</style>"));
        assert!(html.contains("<style>p { margin: 0 }</style>"));
        assert!(!html.contains("<link"));
        assert_eq!(handles.len(), 1);
        let handle = handles.iter().next().unwrap();
        assert_eq!(handle.path, "OEBPS/images/pic.png");
        assert_eq!(handle.media_type, "image/png");
        assert_eq!(html.matches(handle.url.as_str()).count(), 2);
        assert!(html.contains("https://example.com/x.png"));
    }

    #[test]
    fn test_inlined_stylesheet_cannot_close_style() {
        let chapter = r#"<html><head><link rel="stylesheet" href="s.css"/></head>
<body><h1>A</h1><p>x</p></body></html>"#;
        let zip = ZipBuilder::new()
            .stored("META-INF/container.xml", container_xml("content.opf").as_bytes())
            .stored(
                "content.opf",
                opf(
                    &[
                        ("c1", "a.xhtml", "application/xhtml+xml", None),
                        ("css", "s.css", "text/css", None),
                    ],
                    &["c1"],
                )
                .as_bytes(),
            )
            .stored("a.xhtml", chapter.as_bytes())
            .stored(
                "s.css",
                b"p{}</style><script>alert(document.cookie)</script><style>",
            )
            .build();
        let (assembly, _) = assemble_zip(&zip, &LoadOptions::default()).unwrap();
        let html = &assembly.sections[0].html;
        assert!(!html.contains("<script"), "{}", html);
        assert_eq!(html.matches("</style>").count(), 1, "{}", html);
        assert!(html.contains("<p>x</p>"));
        assert_eq!(escape_css_markup("a < b"), "a \\3C  b");
        assert_eq!(escape_css_markup("p { }"), "p { }");
    }

    #[test]
    fn test_missing_resource_is_soft_in_lenient_mode() {
        let zip = epub_with_assets("<h1>A</h1><img src=\"../images/gone.png\"/>", &[]);
        let (assembly, handles) = assemble_zip(&zip, &LoadOptions::default()).unwrap();
        assert!(handles.is_empty());
        assert!(assembly.sections[0].html.contains("../images/gone.png"));
    }

    #[test]
    fn test_missing_resource_is_fatal_in_strict_mode() {
        let zip = epub_with_assets("<h1>A</h1>", &[]);
        let options = LoadOptions::builder().strict().build();
        let err = assemble_zip(&zip, &options).unwrap_err();
        assert_eq!(
            err,
            EpubError::ResourceNotFound {
                path: "OEBPS/styles/missing.css".into()
            }
        );
    }

    #[test]
    fn test_resources_released_with_handles() {
        let zip = epub_with_assets(
            "<h1>A</h1><img src=\"../images/pic.png\"/>",
            &[("OEBPS/images/pic.png", b"\x89PNG")],
        );
        let index = build_index(&zip).unwrap();
        let package = crate::package::parse_package(&zip, &index).unwrap();
        let store = Arc::new(MemoryResourceStore::new());
        {
            let mut handles = ResourceHandles::new(store.clone());
            assemble(&zip, &index, &package, &mut handles, &LoadOptions::default()).unwrap();
            assert_eq!(store.len(), 1);
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_sanitized_before_split() {
        let zip = simple_epub(&[(
            "a.xhtml",
            "<h1 onclick=\"x()\">A</h1><script>evil()</script><p>ok</p>",
        )]);
        let (assembly, _) = assemble_zip(&zip, &LoadOptions::default()).unwrap();
        assert_eq!(assembly.sections[0].html, "<h1 id=\"a\">A</h1><p>ok</p>");
    }

    #[test]
    fn test_non_markup_spine_items_skipped() {
        let zip = ZipBuilder::new()
            .stored("META-INF/container.xml", container_xml("content.opf").as_bytes())
            .stored(
                "content.opf",
                opf(
                    &[
                        ("c1", "a.xhtml", "application/xhtml+xml", None),
                        ("pic", "p.png", "image/png", None),
                    ],
                    &["pic", "c1", "ghost"],
                )
                .as_bytes(),
            )
            .stored("a.xhtml", xhtml("<p>t</p>").as_bytes())
            .stored("p.png", b"png")
            .build();
        let (assembly, _) = assemble_zip(&zip, &LoadOptions::default()).unwrap();
        assert_eq!(assembly.sections.len(), 1);
        assert_eq!(assembly.sections[0].id, "chapter-1");
    }
}
