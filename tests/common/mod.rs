//! EPUB fixtures written with the `zip` crate.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// How a member is stored
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Stored,
    Deflated,
}

/// Write a ZIP archive from `(name, bytes, method)` members.
pub fn build_zip(members: &[(&str, &[u8], Method)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes, method) in members {
        let method = match method {
            Method::Stored => CompressionMethod::Stored,
            Method::Deflated => CompressionMethod::Deflated,
        };
        let options = SimpleFileOptions::default().compression_method(method);
        writer.start_file(*name, options).expect("start_file");
        writer.write_all(bytes).expect("write member");
    }
    writer.finish().expect("finish zip").into_inner()
}

pub fn container_xml(opf_path: &str) -> String {
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

/// One manifest row
pub struct Item<'a> {
    pub id: &'a str,
    pub href: &'a str,
    pub media_type: &'a str,
    pub properties: Option<&'a str>,
}

pub fn xhtml_item<'a>(id: &'a str, href: &'a str) -> Item<'a> {
    Item {
        id,
        href,
        media_type: "application/xhtml+xml",
        properties: None,
    }
}

pub fn opf(title: &str, items: &[Item<'_>], spine: &[&str], toc: Option<&str>) -> String {
    let manifest: String = items
        .iter()
        .map(|item| {
            let props = item
                .properties
                .map(|p| format!(" properties=\"{}\"", p))
                .unwrap_or_default();
            format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"{}/>\n",
                item.id, item.href, item.media_type, props
            )
        })
        .collect();
    let itemrefs: String = spine
        .iter()
        .map(|idref| format!("    <itemref idref=\"{}\"/>\n", idref))
        .collect();
    let toc_attr = toc.map(|id| format!(" toc=\"{}\"", id)).unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>{}</dc:title>
    <dc:creator>Fixture Author</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier id="uid">urn:uuid:fixture</dc:identifier>
  </metadata>
  <manifest>
{}  </manifest>
  <spine{}>
{}  </spine>
</package>"#,
        title, manifest, toc_attr, itemrefs
    )
}

pub fn xhtml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>fixture</title></head>
<body>{}</body>
</html>"#,
        body
    )
}

/// EPUB with the package at `OEBPS/content.opf`. `files` are paths relative
/// to `OEBPS/`; XHTML files are deflated, everything else stored.
pub fn epub(title: &str, items: &[Item<'_>], spine: &[&str], files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    epub_with_toc(title, items, spine, None, files)
}

pub fn epub_with_toc(
    title: &str,
    items: &[Item<'_>],
    spine: &[&str],
    toc: Option<&str>,
    files: &[(&str, Vec<u8>)],
) -> Vec<u8> {
    let container = container_xml("OEBPS/content.opf");
    let package = opf(title, items, spine, toc);
    let names: Vec<String> = files.iter().map(|(p, _)| format!("OEBPS/{}", p)).collect();

    let mut members: Vec<(&str, &[u8], Method)> = vec![
        ("mimetype", &b"application/epub+zip"[..], Method::Stored),
        ("META-INF/container.xml", container.as_bytes(), Method::Deflated),
        ("OEBPS/content.opf", package.as_bytes(), Method::Deflated),
    ];
    for (name, (path, bytes)) in names.iter().zip(files) {
        let method = if path.ends_with("html") {
            Method::Deflated
        } else {
            Method::Stored
        };
        members.push((name.as_str(), bytes.as_slice(), method));
    }
    build_zip(&members)
}

/// Book whose chapters are `text/ch{n}.xhtml` with the given bodies.
pub fn chapters_epub(bodies: &[&str]) -> Vec<u8> {
    let hrefs: Vec<String> = (1..=bodies.len())
        .map(|n| format!("text/ch{}.xhtml", n))
        .collect();
    let ids: Vec<String> = (1..=bodies.len()).map(|n| format!("c{}", n)).collect();
    let items: Vec<Item<'_>> = ids
        .iter()
        .zip(&hrefs)
        .map(|(id, href)| xhtml_item(id, href))
        .collect();
    let spine: Vec<&str> = ids.iter().map(String::as_str).collect();
    let files: Vec<(&str, Vec<u8>)> = hrefs
        .iter()
        .zip(bodies)
        .map(|(href, body)| (href.as_str(), xhtml(body).into_bytes()))
        .collect();
    epub("Chapters", &items, &spine, &files)
}
