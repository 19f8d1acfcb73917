//! foxel-ebook -- EPUB container reader for the foxel ebook reader
//!
//! Turns the raw bytes of a downloaded book into an ordered list of
//! sanitized, heading-bounded sections plus a table of contents. EPUB is
//! read straight from memory: ZIP central directory, OPF package, spine
//! documents, navigation. Plain text, Markdown and HTML documents go
//! through the same sanitizer and section splitter.
//!
//! # Features
//!
//! - `deflate` (default) -- inflate DEFLATE members with `miniz_oxide`
//! - `async` -- tokio loader that extracts each document's resources
//!   concurrently
//! - `cli` -- the `foxel-ebook` inspection binary
//!
//! # Example
//!
//! ```no_run
//! let bytes = std::fs::read("book.epub").unwrap();
//! let book = foxel_ebook::load_epub(&bytes).unwrap();
//! for item in book.toc() {
//!     println!("{} -> {}", item.title, book.sections()[item.section_index].id);
//! }
//! ```

#![warn(missing_docs)]
#![deny(clippy::large_enum_variant, clippy::large_stack_arrays, clippy::redundant_clone)]
#![warn(
    clippy::box_collection,
    clippy::needless_collect,
    clippy::map_clone,
    clippy::implicit_clone,
    clippy::inefficient_to_string
)]

pub mod assemble;
pub mod book;
pub mod cursor;
pub mod dom;
pub mod error;
pub mod formats;
pub mod navigation;
pub mod package;
pub mod resources;
pub mod sanitize;
pub mod search;
pub mod zip;
mod xml;

#[cfg(feature = "async")]
pub mod async_api;

#[cfg(test)]
mod testutil;

// Re-export key types for convenience
pub use assemble::{assemble, Assembly, Section, SectionSplitter, TocItem};
#[cfg(feature = "async")]
pub use async_api::{load_epub_async, load_epub_file_async};
pub use book::{
    load_epub, load_epub_file, load_epub_with, LoadOptions, LoadOptionsBuilder, LoadedBook,
    ValidationMode,
};
pub use error::{CorruptionKind, EpubError};
pub use formats::{load_document, load_html, load_markdown, load_plain_text, DocumentFormat};
pub use navigation::{resolve_nav, NavEntry, ResolvedToc, TocSource};
pub use package::{parse_package, ManifestItem, Package, PackageMetadata};
pub use resources::{MemoryResourceStore, ResourceHandle, ResourceHandles, ResourceStore};
pub use sanitize::{sanitize_html, SanitizePolicy};
pub use search::{search_sections, SearchHit};
pub use crate::zip::{build_index, extract, Archive, ArchiveIndex, ZipEntryMeta, ZipLimits};
