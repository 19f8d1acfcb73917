//! Async EPUB loading on tokio.
//!
//! This module is available with the `async` feature.
//!
//! Spine documents are still processed one after another. Within a
//! document, every referenced member is inflated on the blocking pool at
//! the same time; registration and URL rewriting only start once all of
//! them are back. Dropping the future mid-load therefore leaves no
//! half-rewritten document behind, and the handles registered so far are
//! released with the guard.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::assemble::{DocumentContext, SectionSplitter};
use crate::book::{LoadOptions, LoadedBook};
use crate::error::EpubError;
use crate::navigation::resolve_nav;
use crate::package::parse_package_with_limits;
use crate::resources::{ResourceHandles, ResourceStore};
use crate::zip::{build_index_with_limits, extract_with_limits};

/// Read an EPUB file asynchronously and load it.
pub async fn load_epub_file_async<P: AsRef<Path>>(
    path: P,
    store: Arc<dyn ResourceStore>,
    options: LoadOptions,
) -> Result<LoadedBook, EpubError> {
    let bytes = tokio::fs::read(path).await?;
    load_epub_async(Arc::from(bytes), store, options).await
}

/// Load an EPUB held in memory, extracting each document's resources
/// concurrently.
///
/// Produces the same sections and TOC as [`crate::load_epub_with`].
pub async fn load_epub_async(
    data: Arc<[u8]>,
    store: Arc<dyn ResourceStore>,
    options: LoadOptions,
) -> Result<LoadedBook, EpubError> {
    let index = build_index_with_limits(&data, &options.zip_limits)?;
    let package = parse_package_with_limits(&data, &index, &options.zip_limits)?;

    let mut resources = ResourceHandles::new(store);
    let mut splitter = SectionSplitter::new();
    let ctx = DocumentContext::new(&data, &index, &package, &options);

    for spine_index in 0..package.spine.len() {
        let Some(job) = ctx.prepare(spine_index)? else {
            continue;
        };

        let mut tasks = JoinSet::new();
        for path in job.fetch_list() {
            if resources.url_for(&path).is_some() {
                continue;
            }
            let meta = index
                .get(&path)
                .cloned()
                .ok_or_else(|| EpubError::ResourceNotFound { path: path.clone() })?;
            let data = Arc::clone(&data);
            let limits = options.zip_limits;
            tasks.spawn_blocking(move || {
                extract_with_limits(&data, &meta, &limits).map(|bytes| (path, bytes))
            });
        }

        let mut fetched = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (path, bytes) = joined
                .map_err(|e| EpubError::Io(format!("extraction task failed: {}", e)))??;
            fetched.insert(path, bytes);
        }
        log::debug!(
            "[ASYNC] {}: fetched {} members",
            job.source,
            fetched.len()
        );

        ctx.finish(job, fetched, &mut resources, &mut splitter);
    }

    let assembly = splitter.into_assembly();
    let toc = resolve_nav(&data, &index, &package, &assembly.sections, &options)?;

    Ok(LoadedBook::from_parts(
        assembly.sections,
        toc.items,
        toc.source,
        resources,
        package,
    ))
}
