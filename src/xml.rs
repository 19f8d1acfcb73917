//! quick-xml helpers shared by the container, OPF and NCX readers

use std::borrow::Cow;

use quick_xml::encoding::Decoder;
use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use quick_xml::events::BytesStart;

use crate::error::EpubError;

/// Decode a tag or attribute name.
pub(crate) fn decode_name(name: &[u8], decoder: Decoder) -> Result<String, EpubError> {
    decoder
        .decode(name)
        .map(|s| s.into_owned())
        .map_err(|e| EpubError::Markup(format!("Decode error: {:?}", e)))
}

/// Read one attribute by exact key from a SAX start tag.
pub(crate) fn get_attribute(e: &BytesStart<'_>, decoder: Decoder, name: &str) -> Option<String> {
    for attr in e.html_attributes().flatten() {
        if attr.key.as_ref() == name.as_bytes() {
            let raw = decoder.decode(&attr.value).ok()?;
            return Some(unescape_lossy(&raw).into_owned());
        }
    }
    None
}

/// Part of a qualified name after the namespace prefix.
pub(crate) fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

/// Resolve the body of an entity reference (`amp`, `#8212`).
///
/// Unknown names are kept verbatim as `&name;`.
pub(crate) fn resolve_entity(name: &str) -> String {
    let reference = format!("&{};", name);
    match unescape_with(&reference, resolve_predefined_entity) {
        Ok(resolved) => resolved.into_owned(),
        Err(_) => reference,
    }
}

/// Unescape text, leaving it untouched if it contains a bad reference.
fn unescape_lossy(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    unescape_with(raw, resolve_predefined_entity).unwrap_or(Cow::Borrowed(raw))
}
