//! High-level EPUB loading.
//!
//! One call runs the whole pipeline for a downloaded book:
//! index the archive, parse the package, assemble sections, resolve the
//! table of contents. Each load owns its own archive index and resource
//! handles; nothing is shared between loads.

use std::path::Path;
use std::sync::Arc;

use crate::assemble::{assemble, Section, TocItem};
use crate::error::EpubError;
use crate::navigation::{resolve_nav, TocSource};
use crate::package::{parse_package_with_limits, Package, PackageMetadata};
use crate::resources::{MemoryResourceStore, ResourceHandles, ResourceStore};
use crate::sanitize::SanitizePolicy;
use crate::search::{search_sections, SearchHit, DEFAULT_SEARCH_LIMIT};
use crate::zip::{build_index_with_limits, ZipLimits};

/// Validation strictness for the load pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ValidationMode {
    /// Skip missing resources and spine documents with a warning.
    #[default]
    Lenient,
    /// Fail on the first missing resource.
    Strict,
}

/// Configuration for one load.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// ZIP safety limits applied to every extraction.
    pub zip_limits: ZipLimits,
    /// Validation strictness.
    pub validation_mode: ValidationMode,
    /// Allow-lists used on every content document.
    pub sanitize: SanitizePolicy,
}

impl LoadOptions {
    /// Start from the defaults.
    pub fn builder() -> LoadOptionsBuilder {
        LoadOptionsBuilder::new()
    }
}

/// Builder for [`LoadOptions`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadOptionsBuilder {
    options: LoadOptions,
}

impl LoadOptionsBuilder {
    /// Create a new builder with default limits and lenient validation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set explicit ZIP limits.
    pub fn zip_limits(mut self, limits: ZipLimits) -> Self {
        self.options.zip_limits = limits;
        self
    }

    /// Enable strict validation mode.
    pub fn strict(mut self) -> Self {
        self.options.validation_mode = ValidationMode::Strict;
        self
    }

    /// Set explicit validation mode.
    pub fn validation_mode(mut self, mode: ValidationMode) -> Self {
        self.options.validation_mode = mode;
        self
    }

    /// Replace the sanitizer policy.
    pub fn sanitize_policy(mut self, policy: SanitizePolicy) -> Self {
        self.options.sanitize = policy;
        self
    }

    /// Finish building.
    pub fn build(self) -> LoadOptions {
        self.options
    }
}

/// A fully loaded book.
///
/// Dropping it releases every resource handle created during the load.
#[derive(Debug)]
pub struct LoadedBook {
    sections: Vec<Section>,
    toc: Vec<TocItem>,
    toc_source: TocSource,
    resources: ResourceHandles,
    package: Package,
}

impl LoadedBook {
    /// Sections in reading order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Table of contents, sorted by section index.
    pub fn toc(&self) -> &[TocItem] {
        &self.toc
    }

    /// Where the table of contents came from.
    pub fn toc_source(&self) -> TocSource {
        self.toc_source
    }

    /// Resource handles owned by this book.
    pub fn resources(&self) -> &ResourceHandles {
        &self.resources
    }

    /// Parsed package document.
    pub fn package(&self) -> &Package {
        &self.package
    }

    /// Dublin Core metadata.
    pub fn metadata(&self) -> &PackageMetadata {
        &self.package.metadata
    }

    /// Book title, falling back to an empty string.
    pub fn title(&self) -> &str {
        self.package.metadata.title.as_deref().unwrap_or("")
    }

    /// Index of the section with `id`, also matching inner anchors.
    pub fn section_index(&self, id: &str) -> Option<usize> {
        self.sections
            .iter()
            .position(|s| s.id == id)
            .or_else(|| {
                self.sections
                    .iter()
                    .position(|s| s.anchors.iter().any(|a| a == id))
            })
    }

    /// Keyword search over section text.
    pub fn search(&self, keyword: &str) -> Vec<SearchHit> {
        search_sections(&self.sections, keyword, DEFAULT_SEARCH_LIMIT)
    }

    pub(crate) fn from_parts(
        sections: Vec<Section>,
        toc: Vec<TocItem>,
        toc_source: TocSource,
        resources: ResourceHandles,
        package: Package,
    ) -> Self {
        Self {
            sections,
            toc,
            toc_source,
            resources,
            package,
        }
    }
}

/// Load an EPUB held in memory with default options and an in-process
/// resource store.
pub fn load_epub(data: &[u8]) -> Result<LoadedBook, EpubError> {
    load_epub_with(
        data,
        Arc::new(MemoryResourceStore::new()),
        &LoadOptions::default(),
    )
}

/// Load an EPUB from a file path.
pub fn load_epub_file<P: AsRef<Path>>(
    path: P,
    store: Arc<dyn ResourceStore>,
    options: &LoadOptions,
) -> Result<LoadedBook, EpubError> {
    let data = std::fs::read(path)?;
    load_epub_with(&data, store, options)
}

/// Load an EPUB held in memory.
///
/// On error every handle registered so far is released before returning.
pub fn load_epub_with(
    data: &[u8],
    store: Arc<dyn ResourceStore>,
    options: &LoadOptions,
) -> Result<LoadedBook, EpubError> {
    let index = build_index_with_limits(data, &options.zip_limits)?;
    let package = parse_package_with_limits(data, &index, &options.zip_limits)?;

    let mut resources = ResourceHandles::new(store);
    let assembly = assemble(data, &index, &package, &mut resources, options)?;
    let toc = resolve_nav(data, &index, &package, &assembly.sections, options)?;

    log::debug!(
        "[BOOK] Loaded '{}': {} sections, {} TOC entries ({:?}), {} resources",
        package.metadata.title.as_deref().unwrap_or(""),
        assembly.sections.len(),
        toc.items.len(),
        toc.source,
        resources.len()
    );

    Ok(LoadedBook::from_parts(
        assembly.sections,
        toc.items,
        toc.source,
        resources,
        package,
    ))
}
