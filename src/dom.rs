//! HTML document model
//!
//! Content documents are parsed as HTML with scraper (html5ever), the way a
//! browser would: bare `&`, stray `<`, unclosed and misnested tags all
//! recover instead of truncating the chapter. The result is copied into a
//! small owned tree that the assembler can rewrite, sanitize and split.

use scraper::{ElementRef, Html};

/// Elements that never have children or an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose text is serialized without escaping.
const RAW_TEXT_ELEMENTS: &[&str] = &["style", "script"];

/// Elements that separate words when flattening to plain text.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav",
    "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// A node in the document tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// An element with attributes and children
    Element(Element),
    /// Unescaped character data
    Text(String),
}

/// An element node
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Element {
    /// Tag name (lowercase for HTML elements)
    pub name: String,
    /// Attributes in source order, values unescaped
    pub attrs: Vec<(String, String)>,
    /// Child nodes
    pub children: Vec<Node>,
}

impl Element {
    /// Create an element without attributes or children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Tag name comparison, ASCII case-insensitive.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Look up an attribute (ASCII case-insensitive key).
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Set or replace an attribute.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attrs
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some((_, v)) => *v = value,
            None => self.attrs.push((key.to_string(), value)),
        }
    }

    /// Remove an attribute if present.
    pub fn remove_attr(&mut self, key: &str) {
        self.attrs.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    /// The `id` attribute, if present and non-empty.
    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    /// Heading level for `h1`..`h6`.
    pub fn heading_level(&self) -> Option<u8> {
        heading_level(&self.name)
    }

    /// Append text, merging with a trailing text node.
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }

    /// Shallow copy: name and attributes, no children.
    pub fn shallow_clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            attrs: self.attrs.clone(),
            children: Vec::new(),
        }
    }

    /// Concatenated text of the subtree, excluding `style`/`script`.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out, false);
        out
    }

    /// Text of the direct text children, including raw-text elements.
    pub fn raw_text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Whitespace-normalized text, with block boundaries acting as spaces.
    pub fn plain_text(&self) -> String {
        let mut raw = String::new();
        collect_element_text(self, &mut raw, true);
        normalize_whitespace(&raw)
    }

    /// First descendant element (pre-order) matching `pred`.
    pub fn find<'a>(&'a self, pred: &dyn Fn(&Element) -> bool) -> Option<&'a Element> {
        for child in &self.children {
            if let Node::Element(el) = child {
                if pred(el) {
                    return Some(el);
                }
                if let Some(found) = el.find(pred) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// All descendant elements (pre-order) matching `pred`.
    pub fn find_all<'a>(&'a self, pred: &dyn Fn(&Element) -> bool) -> Vec<&'a Element> {
        let mut out = Vec::new();
        self.walk(&mut |el| {
            if pred(el) {
                out.push(el);
            }
        });
        out
    }

    /// Visit every descendant element in document order.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Element)) {
        for child in &self.children {
            if let Node::Element(el) = child {
                f(el);
                el.walk(f);
            }
        }
    }

    /// Visit every descendant element in document order, mutably.
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Element)) {
        for child in &mut self.children {
            if let Node::Element(el) = child {
                f(el);
                el.walk_mut(f);
            }
        }
    }

    fn is_raw_text(&self) -> bool {
        RAW_TEXT_ELEMENTS.iter().any(|n| self.is(n))
    }

    fn is_void(&self) -> bool {
        is_void_element(&self.name)
    }
}

/// A parsed document: a nameless root holding the `<html>` element.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    /// Synthetic root; its name is empty and it is never serialized.
    pub root: Element,
}

impl Document {
    /// The `<body>` element, if the document has one.
    pub fn body(&self) -> Option<&Element> {
        self.root.find(&|el| el.is("body"))
    }

    /// The `<head>` element, if the document has one.
    pub fn head(&self) -> Option<&Element> {
        self.root.find(&|el| el.is("head"))
    }

    /// Body content, preceded by the `<style>` elements of `<head>`.
    ///
    /// Whitespace-only text at either end of the body is dropped. A tree
    /// without a body yields its top-level nodes.
    pub fn into_body_nodes(self) -> Vec<Node> {
        if self.body().is_none() {
            return self.root.children;
        }
        let mut nodes: Vec<Node> = self
            .head()
            .map(|head| {
                head.find_all(&|el| el.is("style"))
                    .into_iter()
                    .map(|el| Node::Element(el.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(body) = take_element(self.root.children, &|el| el.is("body")) {
            let mut children = body.children;
            trim_blank_edges(&mut children);
            nodes.extend(children);
        }
        nodes
    }
}

fn is_blank(node: Option<&Node>) -> bool {
    matches!(node, Some(Node::Text(text)) if text.trim().is_empty())
}

fn trim_blank_edges(nodes: &mut Vec<Node>) {
    while is_blank(nodes.last()) {
        nodes.pop();
    }
    let leading = nodes.iter().take_while(|n| is_blank(Some(n))).count();
    nodes.drain(..leading);
}

fn take_element(nodes: Vec<Node>, pred: &dyn Fn(&Element) -> bool) -> Option<Element> {
    for node in nodes {
        if let Node::Element(el) = node {
            if pred(&el) {
                return Some(el);
            }
            if let Some(found) = take_element(el.children, pred) {
                return Some(found);
            }
        }
    }
    None
}

/// Heading level for a tag name `h1`..`h6`.
pub fn heading_level(name: &str) -> Option<u8> {
    let bytes = name.as_bytes();
    if bytes.len() == 2 && bytes[0].eq_ignore_ascii_case(&b'h') && (b'1'..=b'6').contains(&bytes[1])
    {
        Some(bytes[1] - b'0')
    } else {
        None
    }
}

/// Whether `name` is an HTML void element.
pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(name))
}

/// Parse a document or fragment as HTML.
///
/// Never fails; syntax errors are recovered the way browsers recover them.
/// Fragments end up inside a synthesized `<html><head/><body>` skeleton.
pub fn parse(markup: &str) -> Document {
    let html = Html::parse_document(markup);
    if !html.errors.is_empty() {
        log::debug!("[DOM] Recovered from {} markup errors", html.errors.len());
    }
    let mut root = Element::default();
    root.children
        .push(Node::Element(copy_element(html.root_element())));
    Document { root }
}

fn copy_element(source: ElementRef<'_>) -> Element {
    let value = source.value();
    let mut el = Element::new(value.name());
    el.attrs = value
        .attrs()
        .map(|(key, val)| (key.to_string(), val.to_string()))
        .collect();
    for child in source.children() {
        match child.value() {
            scraper::Node::Text(text) => el.push_text(text),
            scraper::Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    el.children.push(Node::Element(copy_element(child)));
                }
            }
            // comments, doctype, processing instructions
            _ => {}
        }
    }
    el
}

/// Escape character data for serialization.
pub fn escape_text(text: &str) -> std::borrow::Cow<'_, str> {
    escape_with(text, false)
}

/// Escape an attribute value for a double-quoted serialization.
pub fn escape_attr(value: &str) -> std::borrow::Cow<'_, str> {
    escape_with(value, true)
}

fn escape_with(text: &str, quotes: bool) -> std::borrow::Cow<'_, str> {
    let needs = |c: char| matches!(c, '&' | '<' | '>') || (quotes && c == '"');
    if !text.chars().any(needs) {
        return std::borrow::Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if quotes => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    std::borrow::Cow::Owned(out)
}

/// Serialize a node list.
pub fn to_html(nodes: &[Node]) -> String {
    let mut out = String::new();
    write_nodes(nodes, &mut out, false);
    out
}

fn write_nodes(nodes: &[Node], out: &mut String, raw: bool) {
    for node in nodes {
        match node {
            Node::Text(text) if raw => out.push_str(text),
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Element(el) => write_element(el, out),
        }
    }
}

fn write_element(el: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&el.name);
    for (key, value) in &el.attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }
    if el.is_void() && el.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    write_nodes(&el.children, out, el.is_raw_text());
    out.push_str("</");
    out.push_str(&el.name);
    out.push('>');
}

fn collect_text(nodes: &[Node], out: &mut String, block_breaks: bool) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => collect_element_text(el, out, block_breaks),
        }
    }
}

fn collect_element_text(el: &Element, out: &mut String, block_breaks: bool) {
    if el.is_raw_text() {
        return;
    }
    let block = block_breaks && BLOCK_ELEMENTS.iter().any(|b| el.is(b));
    if block {
        out.push(' ');
    }
    collect_text(&el.children, out, block_breaks);
    if block {
        out.push(' ');
    }
}

/// Flatten a node list to searchable text: no markup, whitespace collapsed.
pub fn nodes_plain_text(nodes: &[Node]) -> String {
    let mut raw = String::new();
    collect_text(nodes, &mut raw, true);
    normalize_whitespace(&raw)
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_was_space = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(ch);
            prev_was_space = false;
        }
    }
    if result.ends_with(' ') {
        result.pop();
    }
    result
}

/// Decode document bytes to text.
///
/// BOM first, then strict UTF-8, then the label from an XML declaration or
/// `<meta charset>`, and finally Windows-1252.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    if let Some(encoding) =
        declared_charset(bytes).and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
    {
        let (text, _) = encoding.decode_without_bom_handling(bytes);
        return text.into_owned();
    }
    let (text, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Sniff `encoding="..."` or `charset=...` from the first KiB.
fn declared_charset(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(1024)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    for key in ["encoding=", "charset="] {
        if let Some(pos) = head.find(key) {
            let rest = head[pos + key.len()..].trim_start_matches(['"', '\'']);
            let label: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
                .collect();
            if !label.is_empty() {
                return Some(label);
            }
        }
    }
    None
}
