//! In-memory ZIP / EPUB builders for unit tests.

use crate::zip::{METHOD_DEFLATED, METHOD_STORED, SIG_CD_ENTRY, SIG_EOCD, SIG_LOCAL_FILE_HEADER};

struct PendingEntry {
    name: String,
    method: u16,
    data: Vec<u8>,
    stored: Vec<u8>,
    crc: u32,
}

/// Writes a minimal single-disk ZIP archive.
#[derive(Default)]
pub(crate) struct ZipBuilder {
    entries: Vec<PendingEntry>,
    comment: Vec<u8>,
}

impl ZipBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn stored(mut self, name: &str, data: &[u8]) -> Self {
        self.entries.push(PendingEntry {
            name: name.to_string(),
            method: METHOD_STORED,
            data: data.to_vec(),
            stored: data.to_vec(),
            crc: crc32fast::hash(data),
        });
        self
    }

    pub(crate) fn deflated(mut self, name: &str, data: &[u8]) -> Self {
        self.entries.push(PendingEntry {
            name: name.to_string(),
            method: METHOD_DEFLATED,
            data: data.to_vec(),
            stored: miniz_oxide::deflate::compress_to_vec(data, 6),
            crc: crc32fast::hash(data),
        });
        self
    }

    /// Entry with an arbitrary method code and raw payload.
    pub(crate) fn raw(mut self, name: &str, method: u16, payload: &[u8]) -> Self {
        self.entries.push(PendingEntry {
            name: name.to_string(),
            method,
            data: payload.to_vec(),
            stored: payload.to_vec(),
            crc: 0,
        });
        self
    }

    pub(crate) fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut zip = Vec::new();
        let mut offsets = Vec::new();

        for entry in &self.entries {
            offsets.push(zip.len() as u32);
            zip.extend_from_slice(&SIG_LOCAL_FILE_HEADER.to_le_bytes());
            zip.extend_from_slice(&20u16.to_le_bytes()); // version needed
            zip.extend_from_slice(&0u16.to_le_bytes()); // flags
            zip.extend_from_slice(&entry.method.to_le_bytes());
            zip.extend_from_slice(&0u16.to_le_bytes()); // mod time
            zip.extend_from_slice(&0u16.to_le_bytes()); // mod date
            zip.extend_from_slice(&entry.crc.to_le_bytes());
            zip.extend_from_slice(&(entry.stored.len() as u32).to_le_bytes());
            zip.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            zip.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            zip.extend_from_slice(&0u16.to_le_bytes()); // extra field length
            zip.extend_from_slice(entry.name.as_bytes());
            zip.extend_from_slice(&entry.stored);
        }

        let cd_offset = zip.len() as u32;
        for (entry, offset) in self.entries.iter().zip(&offsets) {
            zip.extend_from_slice(&SIG_CD_ENTRY.to_le_bytes());
            zip.extend_from_slice(&20u16.to_le_bytes()); // version made by
            zip.extend_from_slice(&20u16.to_le_bytes()); // version needed
            zip.extend_from_slice(&0u16.to_le_bytes()); // flags
            zip.extend_from_slice(&entry.method.to_le_bytes());
            zip.extend_from_slice(&0u16.to_le_bytes()); // mod time
            zip.extend_from_slice(&0u16.to_le_bytes()); // mod date
            zip.extend_from_slice(&entry.crc.to_le_bytes());
            zip.extend_from_slice(&(entry.stored.len() as u32).to_le_bytes());
            zip.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            zip.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            zip.extend_from_slice(&0u16.to_le_bytes()); // extra field length
            zip.extend_from_slice(&0u16.to_le_bytes()); // comment length
            zip.extend_from_slice(&0u16.to_le_bytes()); // disk number start
            zip.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            zip.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            zip.extend_from_slice(&offset.to_le_bytes());
            zip.extend_from_slice(entry.name.as_bytes());
        }
        let cd_size = zip.len() as u32 - cd_offset;
        let count = self.entries.len() as u16;

        zip.extend_from_slice(&SIG_EOCD.to_le_bytes());
        zip.extend_from_slice(&0u16.to_le_bytes()); // disk number
        zip.extend_from_slice(&0u16.to_le_bytes()); // disk with CD
        zip.extend_from_slice(&count.to_le_bytes());
        zip.extend_from_slice(&count.to_le_bytes());
        zip.extend_from_slice(&cd_size.to_le_bytes());
        zip.extend_from_slice(&cd_offset.to_le_bytes());
        zip.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        zip.extend_from_slice(&self.comment);
        zip
    }
}

pub(crate) fn container_xml(opf_path: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{}" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
        opf_path
    )
}

/// OPF with `(id, href, media_type, properties)` manifest rows and a spine.
pub(crate) fn opf(items: &[(&str, &str, &str, Option<&str>)], spine: &[&str]) -> String {
    let mut manifest = String::new();
    for (id, href, media_type, properties) in items {
        match properties {
            Some(props) => manifest.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\" properties=\"{}\"/>\n",
                id, href, media_type, props
            )),
            None => manifest.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
                id, href, media_type
            )),
        }
    }
    let itemrefs: String = spine
        .iter()
        .map(|idref| format!("    <itemref idref=\"{}\"/>\n", idref))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Test Book</dc:title>
    <dc:creator>Test Author</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier id="uid">urn:uuid:test</dc:identifier>
  </metadata>
  <manifest>
{}  </manifest>
  <spine>
{}  </spine>
</package>"#,
        manifest, itemrefs
    )
}

pub(crate) fn xhtml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>t</title></head>
<body>{}</body>
</html>"#,
        body
    )
}

/// EPUB with OPF at `OEBPS/content.opf`; chapter hrefs are relative to it.
pub(crate) fn simple_epub(chapters: &[(&str, &str)]) -> Vec<u8> {
    let items: Vec<(String, String)> = chapters
        .iter()
        .enumerate()
        .map(|(i, (href, _))| (format!("c{}", i + 1), href.to_string()))
        .collect();
    let rows: Vec<(&str, &str, &str, Option<&str>)> = items
        .iter()
        .map(|(id, href)| (id.as_str(), href.as_str(), "application/xhtml+xml", None))
        .collect();
    let spine: Vec<&str> = items.iter().map(|(id, _)| id.as_str()).collect();

    let mut builder = ZipBuilder::new()
        .stored("mimetype", b"application/epub+zip")
        .deflated("META-INF/container.xml", container_xml("OEBPS/content.opf").as_bytes())
        .deflated("OEBPS/content.opf", opf(&rows, &spine).as_bytes());
    for (href, body) in chapters {
        builder = builder.deflated(&format!("OEBPS/{}", href), xhtml(body).as_bytes());
    }
    builder.build()
}
