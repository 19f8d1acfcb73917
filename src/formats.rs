//! Non-EPUB documents: plain text, Markdown and HTML.
//!
//! All three end up on the same path as EPUB content documents: sanitize
//! the markup once, then split it at headings.

use pulldown_cmark::{html, Options, Parser};

use crate::assemble::{Assembly, SectionSplitter};
use crate::dom::{self, escape_text};
use crate::sanitize::{sanitize_nodes, SanitizePolicy};

/// Id of the single section produced for a document without headings.
pub const UNTITLED_SECTION_ID: &str = "section-0";

/// Title of the single section produced for a document without headings.
pub const UNTITLED_SECTION_TITLE: &str = "Document";

/// Document kinds the reader understands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Plain text
    Text,
    /// Markdown
    Markdown,
    /// HTML or XHTML
    Html,
    /// EPUB container
    Epub,
}

impl DocumentFormat {
    /// Pick a format from a file extension; anything unknown is text.
    pub fn from_path(path: &str) -> Self {
        let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "md" | "markdown" => DocumentFormat::Markdown,
            "html" | "xhtml" | "htm" => DocumentFormat::Html,
            "epub" => DocumentFormat::Epub,
            _ => DocumentFormat::Text,
        }
    }
}

/// Escape text and wrap blank-line separated paragraphs in `<p>`; single
/// line breaks become `<br/>`.
pub fn plain_text_to_html(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    let mut out = String::new();
    let mut paragraph: Vec<&str> = Vec::new();
    for line in normalized.split('\n') {
        if line.trim().is_empty() {
            flush_paragraph(&mut paragraph, &mut out);
        } else {
            paragraph.push(line);
        }
    }
    flush_paragraph(&mut paragraph, &mut out);
    out
}

fn flush_paragraph(paragraph: &mut Vec<&str>, out: &mut String) {
    if paragraph.is_empty() {
        return;
    }
    let joined = paragraph
        .iter()
        .map(|line| escape_text(line))
        .collect::<Vec<_>>()
        .join("<br/>");
    out.push_str("<p>");
    out.push_str(joined.trim());
    out.push_str("</p>");
    paragraph.clear();
}

/// Render CommonMark (with tables, footnotes, strikethrough and task
/// lists) to HTML.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Sanitize and split an HTML document or fragment.
pub fn load_html(markup: &str, policy: &SanitizePolicy) -> Assembly {
    let mut nodes = dom::parse(markup).into_body_nodes();
    sanitize_nodes(&mut nodes, policy);
    let mut splitter = SectionSplitter::new();
    splitter.split_with_fallback(nodes, "", UNTITLED_SECTION_ID, UNTITLED_SECTION_TITLE);
    log::debug!("[FMT] Split HTML into {} sections", splitter.sections().len());
    splitter.into_assembly()
}

/// Load a Markdown document.
pub fn load_markdown(markdown: &str, policy: &SanitizePolicy) -> Assembly {
    load_html(&markdown_to_html(markdown), policy)
}

/// Load a plain-text document.
pub fn load_plain_text(text: &str, policy: &SanitizePolicy) -> Assembly {
    load_html(&plain_text_to_html(text), policy)
}

/// Load a non-EPUB document from raw bytes, decoding the text first.
///
/// Returns `None` for [`DocumentFormat::Epub`], which goes through
/// [`crate::load_epub`].
pub fn load_document(
    format: DocumentFormat,
    bytes: &[u8],
    policy: &SanitizePolicy,
) -> Option<Assembly> {
    let text = dom::decode_text(bytes);
    match format {
        DocumentFormat::Text => Some(load_plain_text(&text, policy)),
        DocumentFormat::Markdown => Some(load_markdown(&text, policy)),
        DocumentFormat::Html => Some(load_html(&text, policy)),
        DocumentFormat::Epub => None,
    }
}
