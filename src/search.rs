//! Keyword search over section text.

use crate::assemble::Section;

/// Maximum number of hits returned by default.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Snippet width in characters around a match.
pub const SNIPPET_WIDTH: usize = 60;

/// A matching section
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchHit {
    /// Index into the section sequence
    pub section_index: usize,
    /// Text around the first match, whitespace collapsed
    pub snippet: String,
}

/// Case-insensitive search; at most one hit per section, first `limit`
/// sections in reading order. A blank keyword finds nothing.
pub fn search_sections(sections: &[Section], keyword: &str, limit: usize) -> Vec<SearchHit> {
    let needle: Vec<char> = keyword.chars().map(fold_char).collect();
    if keyword.trim().is_empty() {
        return Vec::new();
    }

    sections
        .iter()
        .enumerate()
        .filter_map(|(section_index, section)| {
            let text: Vec<char> = section.plain_text.chars().collect();
            let pos = find_folded(&text, &needle)?;
            Some(SearchHit {
                section_index,
                snippet: snippet(&text, pos, SNIPPET_WIDTH),
            })
        })
        .take(limit)
        .collect()
}

fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn find_folded(text: &[char], needle: &[char]) -> Option<usize> {
    if needle.len() > text.len() {
        return None;
    }
    (0..=text.len() - needle.len()).find(|&start| {
        text[start..start + needle.len()]
            .iter()
            .zip(needle)
            .all(|(a, b)| fold_char(*a) == *b)
    })
}

/// `width` characters centred on `pos`, with ellipses where text was cut.
pub fn snippet(text: &[char], pos: usize, width: usize) -> String {
    let start = pos.saturating_sub(width / 2);
    let end = (pos + width / 2).min(text.len());
    let mut out = String::new();
    if start > 0 {
        out.push('…');
    }
    out.extend(&text[start..end]);
    if end < text.len() {
        out.push('…');
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
