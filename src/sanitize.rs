//! Allow-list sanitizer over the document tree
//!
//! Walks parsed markup and keeps only known-safe tags, attributes and URL
//! schemes. Dangerous containers (`script`, `iframe`, `object`, ...) are
//! removed together with their content; unknown tags are unwrapped so their
//! text survives. Output re-sanitizes to itself.

use std::collections::HashSet;

use crate::dom::{self, Element, Node};

/// Removed together with everything inside them.
const DEFAULT_DROPPED_TAGS: &[&str] = &[
    "script", "iframe", "object", "embed", "frame", "frameset", "applet", "noscript", "base",
    "meta", "title", "link", "form", "input", "button", "select", "textarea", "template",
];

const DEFAULT_ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "address", "article", "aside", "audio", "b", "bdi", "bdo", "big", "blockquote",
    "br", "caption", "center", "cite", "code", "col", "colgroup", "dd", "del", "details", "dfn",
    "div", "dl", "dt", "em", "figcaption", "figure", "font", "footer", "h1", "h2", "h3", "h4",
    "h5", "h6", "header", "hr", "i", "image", "img", "ins", "kbd", "li", "main", "mark", "nav",
    "ol", "p", "picture", "pre", "q", "rp", "rt", "ruby", "s", "samp", "section", "small",
    "source", "span", "strike", "strong", "style", "sub", "summary", "sup", "svg", "table",
    "tbody", "td", "tfoot", "th", "thead", "time", "tr", "track", "tt", "u", "ul", "var",
    "video", "wbr", "g", "rect", "circle", "path", "text",
];

const DEFAULT_ALLOWED_ATTRIBUTES: &[&str] = &[
    "id", "class", "title", "lang", "xml:lang", "dir", "style", "href", "src", "alt", "width",
    "height", "colspan", "rowspan", "align", "valign", "type", "start", "reversed", "controls",
    "poster", "epub:type", "xlink:href", "viewbox", "preserveaspectratio", "xmlns",
    "xmlns:xlink", "x", "y", "d", "fill", "loop", "muted", "kind", "srclang", "label", "datetime",
    "cite", "open",
];

/// Attributes whose value is a URL and must pass the scheme check.
const URL_ATTRIBUTES: &[&str] = &["href", "src", "xlink:href", "poster", "cite"];

const DEFAULT_ALLOWED_SCHEMES: &[&str] = &["http", "https", "mailto", "blob", "data"];

/// Tag, attribute and URL-scheme allow-lists
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SanitizePolicy {
    allowed_tags: HashSet<String>,
    dropped_tags: HashSet<String>,
    allowed_attributes: HashSet<String>,
    allowed_schemes: HashSet<String>,
    allow_data_attributes: bool,
}

impl Default for SanitizePolicy {
    fn default() -> Self {
        let set = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            allowed_tags: set(DEFAULT_ALLOWED_TAGS),
            dropped_tags: set(DEFAULT_DROPPED_TAGS),
            allowed_attributes: set(DEFAULT_ALLOWED_ATTRIBUTES),
            allowed_schemes: set(DEFAULT_ALLOWED_SCHEMES),
            allow_data_attributes: true,
        }
    }
}

impl SanitizePolicy {
    /// Policy with the default allow-lists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep an additional tag.
    pub fn allow_tag(mut self, tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        self.dropped_tags.remove(&tag);
        self.allowed_tags.insert(tag);
        self
    }

    /// Remove a tag together with its content.
    pub fn drop_tag(mut self, tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        self.allowed_tags.remove(&tag);
        self.dropped_tags.insert(tag);
        self
    }

    /// Keep an additional attribute. `on*` handlers are never kept.
    pub fn allow_attribute(mut self, attr: &str) -> Self {
        self.allowed_attributes.insert(attr.to_ascii_lowercase());
        self
    }

    /// Accept an additional URL scheme.
    pub fn allow_scheme(mut self, scheme: &str) -> Self {
        self.allowed_schemes.insert(scheme.to_ascii_lowercase());
        self
    }

    /// Stop accepting a URL scheme.
    pub fn deny_scheme(mut self, scheme: &str) -> Self {
        self.allowed_schemes.remove(&scheme.to_ascii_lowercase());
        self
    }

    /// Whether `data-*` attributes are kept (default true).
    pub fn with_data_attributes(mut self, allow: bool) -> Self {
        self.allow_data_attributes = allow;
        self
    }

    fn tag_action(&self, name: &str) -> TagAction {
        let name = name.to_ascii_lowercase();
        if self.dropped_tags.contains(&name) {
            TagAction::Drop
        } else if self.allowed_tags.contains(&name) {
            TagAction::Keep
        } else {
            TagAction::Unwrap
        }
    }

    fn keep_attribute(&self, key: &str, value: &str) -> bool {
        let key = key.to_ascii_lowercase();
        if key.starts_with("on") {
            return false;
        }
        let allowed = self.allowed_attributes.contains(&key)
            || (self.allow_data_attributes && key.starts_with("data-"));
        if !allowed || has_script_scheme(value) {
            return false;
        }
        if key == "style" && !is_safe_css(value) {
            return false;
        }
        if URL_ATTRIBUTES.contains(&key.as_str()) {
            return self.url_allowed(value);
        }
        true
    }

    /// Relative URLs and fragment links always pass.
    fn url_allowed(&self, url: &str) -> bool {
        match url_scheme(url) {
            Some(scheme) => self.allowed_schemes.contains(&scheme),
            None => true,
        }
    }
}

enum TagAction {
    Keep,
    Unwrap,
    Drop,
}

/// Value with whitespace and control characters removed, lowercased.
fn compact_lower(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .flat_map(char::to_lowercase)
        .collect()
}

fn has_script_scheme(value: &str) -> bool {
    let compact = compact_lower(value);
    compact.starts_with("javascript:") || compact.starts_with("vbscript:")
}

fn is_safe_css(css: &str) -> bool {
    let compact = compact_lower(css);
    !(compact.contains("expression(")
        || compact.contains("javascript:")
        || compact.contains("vbscript:")
        || compact.contains("-moz-binding")
        || compact.contains("behavior:"))
}

/// A `<style>` is serialized raw, so any `<` in it could end the element
/// early and turn the rest into markup.
fn is_safe_stylesheet(style: &Element) -> bool {
    let only_text = style.children.iter().all(|n| matches!(n, Node::Text(_)));
    let css = style.raw_text();
    only_text && !css.contains('<') && is_safe_css(&css)
}

/// Lowercased scheme of an absolute URL, `None` for relative references.
fn url_scheme(url: &str) -> Option<String> {
    let compact = compact_lower(url);
    let end = compact.find(|c: char| matches!(c, ':' | '/' | '?' | '#'))?;
    if !compact[end..].starts_with(':') || end == 0 {
        return None;
    }
    let scheme = &compact[..end];
    let valid = scheme
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then(|| scheme.to_string())
}

/// Sanitize a node list in place.
pub fn sanitize_nodes(nodes: &mut Vec<Node>, policy: &SanitizePolicy) {
    let input = std::mem::take(nodes);
    for node in input {
        match node {
            Node::Text(text) => push_text(nodes, text),
            Node::Element(el) => sanitize_element(el, policy, nodes),
        }
    }
}

fn push_text(nodes: &mut Vec<Node>, text: String) {
    if let Some(Node::Text(last)) = nodes.last_mut() {
        last.push_str(&text);
    } else if !text.is_empty() {
        nodes.push(Node::Text(text));
    }
}

fn sanitize_element(mut el: Element, policy: &SanitizePolicy, out: &mut Vec<Node>) {
    match policy.tag_action(&el.name) {
        TagAction::Drop => {}
        TagAction::Unwrap => {
            sanitize_nodes(&mut el.children, policy);
            for child in el.children {
                match child {
                    Node::Text(text) => push_text(out, text),
                    other => out.push(other),
                }
            }
        }
        TagAction::Keep => {
            if el.is("style") && !is_safe_stylesheet(&el) {
                return;
            }
            el.attrs
                .retain(|(key, value)| policy.keep_attribute(key, value));
            sanitize_nodes(&mut el.children, policy);
            out.push(Node::Element(el));
        }
    }
}

/// Parse, sanitize and re-serialize a markup string.
pub fn sanitize_html(markup: &str, policy: &SanitizePolicy) -> String {
    let mut nodes = dom::parse(markup).into_body_nodes();
    sanitize_nodes(&mut nodes, policy);
    dom::to_html(&nodes)
}
